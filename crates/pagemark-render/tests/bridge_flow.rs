mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::fixtures::{harness, library, viewport, wait_until, GatedContainer, StrideMeasurer};
use pagemark::{
    Direction, Locator, PublicationId, PublicationIdentity, ScreenEdge, Theme, ViewportConfig,
};
use pagemark_render::{Bridge, BridgeError, MemoryKeyValueStore, OpenError, OpenErrorReason};

fn open(bridge: &Bridge, key: &str) {
    bridge
        .open(&PublicationIdentity::named(key), viewport())
        .unwrap_or_else(|e| panic!("open {}: {}", key, e));
}

#[test]
fn five_page_turns_reach_the_middle_of_chapter_two() {
    let h = harness();
    open(&h.bridge, "book-a");
    let start = h.bridge.current_locator().expect("start");
    assert_eq!(start.href(), "text/ch1.xhtml");
    assert_eq!(start.page_index(), Some(0));

    let mut locator = start;
    for _ in 0..5 {
        locator = h.bridge.advance(Direction::Forward).expect("advance");
    }
    assert_eq!(locator.href(), "text/ch2.xhtml");
    assert_eq!(locator.page_index(), Some(3));
    assert!((locator.total_progression() - 0.625).abs() < 1e-9);
    assert_eq!(h.bridge.current_locator().expect("current"), locator);
}

#[test]
fn walking_the_whole_book_hits_both_ends() {
    let h = harness();
    open(&h.bridge, "book-a");
    assert!(matches!(
        h.bridge.advance(Direction::Backward),
        Err(BridgeError::EndOfPublication)
    ));

    let total_pages = 2 + 6;
    let mut last = h.bridge.current_locator().expect("start");
    let mut previous_total = last.total_progression();
    for _ in 0..total_pages - 1 {
        last = h.bridge.advance(Direction::Forward).expect("advance");
        assert!(last.total_progression() >= previous_total);
        previous_total = last.total_progression();
    }
    assert_eq!(last.href(), "text/ch2.xhtml");
    assert_eq!(last.page_index(), Some(5));

    assert!(matches!(
        h.bridge.advance(Direction::Forward),
        Err(BridgeError::EndOfPublication)
    ));
    assert_eq!(h.bridge.current_locator().expect("unchanged"), last);

    for _ in 0..total_pages - 1 {
        h.bridge.advance(Direction::Backward).expect("back");
    }
    let first = h.bridge.current_locator().expect("first");
    assert_eq!((first.href(), first.page_index()), ("text/ch1.xhtml", Some(0)));
}

#[test]
fn locate_resolves_progression_anchors_and_unknown_hrefs() {
    let h = harness();
    open(&h.bridge, "book-a");

    let position = h
        .bridge
        .locate(&Locator::new("text/ch2.xhtml", "").with_chapter_progression(0.5))
        .expect("locate");
    assert_eq!((position.resource_index, position.page_index), (1, 3));
    assert_eq!(position.page_count, 6);

    let position = h
        .bridge
        .locate_href("text/ch2.xhtml#second-half")
        .expect("anchor");
    assert_eq!(position.page_index, 3);

    let toc = h.bridge.table_of_contents().expect("toc");
    let target = toc.find_toc_href("Chapter 1").expect("toc entry").to_string();
    let position = h.bridge.locate_href(&target).expect("toc target");
    assert_eq!((position.resource_index, position.page_index), (0, 0));

    assert!(matches!(
        h.bridge.locate(&Locator::new("text/ch9.xhtml", "")),
        Err(BridgeError::ResourceNotFound(href)) if href == "text/ch9.xhtml"
    ));
}

#[test]
fn go_to_progression_uses_the_position_index() {
    let h = harness();
    open(&h.bridge, "book-a");
    let position = h.bridge.go_to_progression(0.625).expect("progression");
    assert_eq!((position.resource_index, position.page_index), (1, 3));
    let position = h.bridge.go_to_progression(2.0).expect("clamped");
    assert_eq!((position.resource_index, position.page_index), (1, 5));
    let position = h.bridge.go_to_progression(0.25).expect("boundary");
    assert_eq!((position.resource_index, position.page_index), (1, 0));
}

#[test]
fn unusable_resources_are_skipped() {
    let h = harness();
    open(&h.bridge, "gappy");
    let second_page = h.bridge.advance(Direction::Forward).expect("ch1 page 2");
    assert_eq!((second_page.href(), second_page.page_index()), ("text/ch1.xhtml", Some(1)));
    let next = h.bridge.advance(Direction::Forward).expect("skip broken");
    assert_eq!((next.href(), next.page_index()), ("text/ch3.xhtml", Some(0)));
    let back = h.bridge.advance(Direction::Backward).expect("skip back");
    assert_eq!((back.href(), back.page_index()), ("text/ch1.xhtml", Some(1)));
    assert!(matches!(
        h.bridge.locate(&Locator::new("text/ch2.xhtml", "")),
        Err(BridgeError::Layout { .. })
    ));
}

#[test]
fn failed_open_retains_no_state() {
    let h = harness();
    open(&h.bridge, "book-a");
    assert!(h.bridge.is_open());

    let err = h
        .bridge
        .open(&PublicationIdentity::named("no-such-book"), viewport())
        .expect_err("missing");
    assert!(matches!(
        err,
        BridgeError::Open(OpenError {
            reason: OpenErrorReason::FileMissing,
            ..
        })
    ));
    assert!(!h.bridge.is_open());
    assert!(matches!(
        h.bridge.current_locator(),
        Err(BridgeError::NoPublicationOpen)
    ));
    assert_eq!(h.container.open_handle_count(), 0);

    let err = h
        .bridge
        .open(&PublicationIdentity::named("empty"), viewport())
        .expect_err("empty");
    assert!(matches!(
        err,
        BridgeError::Open(OpenError {
            reason: OpenErrorReason::EmptyPublication,
            ..
        })
    ));
    assert_eq!(h.container.open_handle_count(), 0);

    open(&h.bridge, "book-b");
    let err = h
        .bridge
        .open(
            &PublicationIdentity::named("book-a"),
            ViewportConfig::for_display(0, 800),
        )
        .expect_err("zero-width viewport");
    assert!(matches!(err, BridgeError::InvalidViewport(_)));
    assert!(!h.bridge.is_open());
    assert!(matches!(h.bridge.session(), Err(BridgeError::NoPublicationOpen)));
    assert_eq!(h.container.open_handle_count(), 0);
}

#[test]
fn missing_file_identity_reports_file_missing() {
    let h = harness();
    let path = common::fixtures::temp_dir("missing").join("book.epub");
    let err = h
        .bridge
        .open(&PublicationIdentity::file(path), viewport())
        .expect_err("missing file");
    assert!(matches!(
        err,
        BridgeError::Open(OpenError {
            reason: OpenErrorReason::FileMissing,
            ..
        })
    ));
}

#[test]
fn reopening_closes_the_previous_publication() {
    let h = harness();
    open(&h.bridge, "book-a");
    open(&h.bridge, "book-b");
    assert_eq!(h.container.open_handle_count(), 1);
    assert_eq!(h.bridge.metadata().expect("metadata").title, "Book B");
    h.bridge.close();
    assert_eq!(h.container.open_handle_count(), 0);
    h.bridge.close();
}

#[test]
fn newer_open_supersedes_an_in_flight_open() {
    let (container, entered, release) = GatedContainer::new(library(), "book-a");
    let container = Arc::new(container);
    let bridge = Arc::new(Bridge::new(
        Arc::clone(&container) as Arc<dyn pagemark::ContainerParser>,
        Arc::new(StrideMeasurer::new(500)),
        Arc::new(MemoryKeyValueStore::new()),
    ));

    let first_bridge = Arc::clone(&bridge);
    let first = thread::spawn(move || {
        first_bridge.open(&PublicationIdentity::named("book-a"), viewport())
    });
    entered
        .recv_timeout(Duration::from_secs(10))
        .expect("first open reached the parser");

    let second_bridge = Arc::clone(&bridge);
    let second = thread::spawn(move || {
        second_bridge.open(&PublicationIdentity::named("book-b"), viewport())
    });
    wait_until(|| bridge.pending_operations() >= 2);
    release.send(()).expect("release first open");

    let first = first.join().expect("first thread");
    let second = second.join().expect("second thread");
    assert!(matches!(
        first,
        Err(BridgeError::Open(OpenError {
            reason: OpenErrorReason::Superseded,
            ..
        }))
    ));
    second.expect("second open");

    assert_eq!(
        bridge.publication_id(),
        Some(PublicationId::from_name("book-b"))
    );
    assert_eq!(bridge.metadata().expect("metadata").title, "Book B");
    assert_eq!(container.open_handle_count(), 1);
}

#[test]
fn mutating_calls_from_many_threads_stay_consistent() {
    let h = harness();
    open(&h.bridge, "book-a");
    let bridge = Arc::new(h.bridge);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..2 {
                    let _ = bridge.advance(Direction::Forward);
                    let _ = bridge.current_locator();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    let locator = bridge.current_locator().expect("locator");
    assert_eq!(locator.href(), "text/ch2.xhtml");
    assert_eq!(locator.page_index(), Some(5));
    assert_eq!(bridge.pending_operations(), 0);
}

#[test]
fn racing_setting_changes_are_both_applied() {
    let h = harness();
    open(&h.bridge, "book-a");
    let bridge = Arc::new(h.bridge);
    for round in 0..100 {
        bridge.set_viewport(viewport()).expect("reset viewport");
        let barrier = Arc::new(Barrier::new(2));
        let font = {
            let (bridge, barrier) = (Arc::clone(&bridge), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                bridge.set_font_scale(1.25)
            })
        };
        let theme = {
            let (bridge, barrier) = (Arc::clone(&bridge), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                bridge.set_theme("sepia")
            })
        };
        font.join().expect("font thread").expect("font scale");
        theme.join().expect("theme thread").expect("theme");

        let applied = bridge.viewport().expect("viewport");
        assert_eq!(applied.font_scale, 1.25, "round {round}");
        assert_eq!(applied.theme, Theme::Sepia, "round {round}");
        assert_eq!(bridge.session().expect("session").viewport, applied);
    }
}

#[test]
fn edge_taps_respect_right_to_left_books() {
    let h = harness();
    h.bridge
        .open(
            &PublicationIdentity::named("book-a"),
            viewport().with_progression(pagemark::ReadingProgression::Rtl),
        )
        .expect("open rtl");
    assert!(h
        .bridge
        .turn_page(ScreenEdge::Right)
        .is_err_and(|e| matches!(e, BridgeError::EndOfPublication)));
    let next = h.bridge.turn_page(ScreenEdge::Left).expect("left turns forward");
    assert_eq!(next.and_then(|l| l.page_index()), Some(1));
}
