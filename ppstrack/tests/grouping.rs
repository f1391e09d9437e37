use ppstrack::group::Grouper;
use ppstrack::Anomaly;

mod common;
use common::{boundary, s};

#[test]
fn events_land_in_their_period() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());
    let mut out = Vec::new();

    assert_eq!(None, g.on_boundary(boundary(0, s(0.0))).unwrap());
    g.on_signal(2, s(0.2)).unwrap();
    g.on_signal(2, s(0.9)).unwrap();
    out.extend(g.on_boundary(boundary(1, s(1.0))).unwrap());
    g.on_signal(2, s(1.1)).unwrap();
    out.extend(g.on_boundary(boundary(2, s(2.0))).unwrap());
    g.on_signal(2, s(2.5)).unwrap();
    out.extend(g.on_boundary(boundary(3, s(3.0))).unwrap());

    assert_eq!(3, out.len());
    assert_eq!(Some(&[s(0.2), s(0.9)][..]), out[0].offsets(2));
    assert_eq!(Some(&[s(0.1)][..]), out[1].offsets(2));
    assert_eq!(Some(&[s(0.5)][..]), out[2].offsets(2));
    for (i, grp) in out.iter().enumerate() {
        assert_eq!(i as u64, grp.index());
        assert_eq!(s(i as f64), grp.start());
        assert_eq!(Some(s(i as f64 + 1.0)), grp.end());
    }
    assert_eq!(Some((3, s(3.0))), g.current());
    assert_eq!(3, status.report().groups);
}

#[test]
fn lost_boundary_is_a_gap() {
    let status = common::status();
    let mut g = Grouper::new(vec![2, -3], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    let g0 = g.on_boundary(boundary(1, s(1.0))).unwrap().unwrap();
    g.on_signal(2, s(1.4)).unwrap();
    g.on_signal(-3, s(2.6)).unwrap();
    let g1 = g.on_boundary(boundary(3, s(3.0))).unwrap().unwrap();
    g.on_signal(2, s(3.3)).unwrap();
    let g3 = g.finish().unwrap();

    assert_eq!(0, g0.index());
    assert_eq!(1, g1.index());
    assert_eq!(Some(&[s(0.4)][..]), g1.offsets(2));
    assert_eq!(Some(&[s(1.6)][..]), g1.offsets(-3));
    assert_eq!(Some(s(3.0)), g1.end());
    assert_eq!(3, g3.index());
    assert_eq!(Some(&[s(0.3)][..]), g3.offsets(2));
    assert_eq!(None, g3.end());

    let r = status.report();
    assert_eq!(1, r.sequence_gaps);
    assert_eq!(1, r.missed_periods);
    assert_eq!(Some(3), r.last_index);
}

#[test]
fn late_event_is_dropped() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_boundary(boundary(1, s(1.0))).unwrap();
    let err = g.on_signal(2, s(0.95)).unwrap_err();
    assert!(matches!(err, Anomaly::LateEvent { channel: 2, index: 1, .. }));
    let g1 = g.finish().unwrap();

    assert_eq!(Some(&[][..]), g1.offsets(2));
    assert_eq!(1, status.report().late_events);
}

#[test]
fn early_event_is_carried_forward() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(2, s(0.5)).unwrap();
    // delivered before the reference tag that closes period 0
    g.on_signal(2, s(1.000_001)).unwrap();
    let g0 = g.on_boundary(boundary(1, s(1.0))).unwrap().unwrap();
    let g1 = g.finish().unwrap();

    assert_eq!(Some(&[s(0.5)][..]), g0.offsets(2));
    assert_eq!(Some(&[s(0.000_001)][..]), g1.offsets(2));
    assert_eq!(0, status.report().late_events);
}

#[test]
fn events_before_first_reference_are_counted() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_signal(2, s(0.1)).unwrap();
    g.on_signal(2, s(0.2)).unwrap();
    assert_eq!(None, g.finish());
    assert_eq!(2, status.report().pre_reference_events);
}

#[test]
fn other_channels_are_ignored() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(5, s(0.1)).unwrap();
    g.on_signal(5, -s(1.0)).unwrap();
    let g0 = g.finish().unwrap();

    assert_eq!(1, g0.channels().len());
    assert_eq!(None, g0.offsets(5));
    assert_eq!(0, status.report().late_events);
}

#[test]
fn index_regression_is_rejected() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_boundary(boundary(4, s(0.0))).unwrap();
    g.on_signal(2, s(0.3)).unwrap();
    let err = g.on_boundary(boundary(4, s(1.0))).unwrap_err();
    assert_eq!(Anomaly::IndexRegression { previous: 4, index: 4 }, err);

    // period 4 is still open and unchanged
    assert_eq!(Some((4, s(0.0))), g.current());
    let g4 = g.finish().unwrap();
    assert_eq!(Some(&[s(0.3)][..]), g4.offsets(2));
    assert_eq!(1, status.report().index_regressions);
}

#[test]
fn out_of_order_events_are_sorted() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status);

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(2, s(0.7)).unwrap();
    g.on_signal(2, s(0.2)).unwrap();
    g.on_signal(2, s(0.5)).unwrap();
    let g0 = g.finish().unwrap();

    assert_eq!(Some(&[s(0.2), s(0.5), s(0.7)][..]), g0.offsets(2));
}

#[test]
fn finalized_groups_do_not_change() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status);

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(2, s(0.4)).unwrap();
    let g0 = g.on_boundary(boundary(1, s(1.0))).unwrap().unwrap();
    let copy = (*g0).clone();
    g.on_signal(2, s(1.2)).unwrap();
    g.on_boundary(boundary(2, s(2.0))).unwrap();
    g.finish();

    assert_eq!(copy, *g0);
    assert_eq!(None, g.finish());
}

#[test]
fn missing_channels_are_noted() {
    let status = common::status();
    let mut g = Grouper::new(vec![2, -3], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(2, s(0.4)).unwrap();
    let g0 = g.finish().unwrap();

    assert_eq!(vec![-3], g0.missing_channels());
    let messages = status.messages_since(0);
    assert!(messages.iter().any(|m| m.text == "Tags missing: input -3"));
}

#[test]
fn labels_follow_the_host_clock() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status);

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_boundary(boundary(1, s(1.0))).unwrap();
    let g1 = g.finish().unwrap();
    let g0_label = common::t0();

    assert_eq!(g0_label + chrono::Duration::seconds(1), g1.label());
}

#[test]
fn labels_use_anchors_not_arrival_time() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status);
    let at = |ms| common::t0() + chrono::Duration::milliseconds(ms);

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.anchor(s(0.5), at(500));
    // reference tag dequeued 400 ms late
    let mut b1 = boundary(1, s(1.0));
    b1.observed_at = at(1400);
    let g0 = g.on_boundary(b1).unwrap().unwrap();
    g.anchor(s(1.5), at(1500));
    let g1 = g.on_boundary(boundary(2, s(2.0))).unwrap().unwrap();

    assert_eq!(at(0), g0.label());
    assert_eq!(at(1000), g1.label());
}

#[test]
fn lost_reference_closes_the_period() {
    let status = common::status();
    let mut g = Grouper::new(vec![2], status.clone());

    g.on_boundary(boundary(0, s(0.0))).unwrap();
    g.on_signal(2, s(0.1)).unwrap();
    g.on_boundary(boundary(1, s(1.0))).unwrap();
    g.on_signal(2, s(1.1)).unwrap();
    let g1 = g.on_reference_lost().unwrap();
    assert_eq!(None, g.current());
    assert_eq!(None, g.on_reference_lost());

    g.on_signal(2, s(2.1)).unwrap();
    assert_eq!(None, g.on_boundary(boundary(3, s(3.0))).unwrap());
    g.on_signal(2, s(3.1)).unwrap();
    let g3 = g.finish().unwrap();

    assert_eq!(1, g1.index());
    assert_eq!(Some(&[s(0.1)][..]), g1.offsets(2));
    assert_eq!(None, g1.end());
    assert_eq!(3, g3.index());
    assert_eq!(Some(&[s(0.1)][..]), g3.offsets(2));

    let r = status.report();
    assert_eq!(1, r.unreferenced_events);
    assert_eq!(0, r.pre_reference_events);
    assert_eq!(1, r.sequence_gaps);
    assert_eq!(3, r.groups);
}
