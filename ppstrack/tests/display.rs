use ppstools::{ChannelOffsets, Group};
use ppstrack::display::DisplayBuffer;
use std::sync::Arc;

mod common;

fn group(index: u64, offsets: Vec<i64>) -> Arc<Group> {
    Arc::new(Group::new(
        index,
        common::t0(),
        index as i64,
        None,
        vec![ChannelOffsets { channel: 2, offsets }],
    ))
}

#[test]
fn keeps_the_most_recent() {
    let d = DisplayBuffer::new(3);
    for i in 0..10 {
        d.push(group(i, vec![]));
        assert!(d.len() <= 3);
    }
    let snap = d.snapshot();
    let indices: Vec<u64> = snap.groups().iter().map(|g| g.index()).collect();
    assert_eq!(vec![7, 8, 9], indices);
    assert_eq!(Some(7..=9), snap.indices());
    assert_eq!(9, snap.latest().unwrap().index());
}

#[test]
fn snapshot_is_detached() {
    let d = DisplayBuffer::new(2);
    d.push(group(0, vec![1]));
    let snap = d.snapshot();
    d.push(group(1, vec![2]));
    d.push(group(2, vec![3]));

    assert_eq!(1, snap.len());
    assert_eq!(0, snap.groups()[0].index());
    assert_eq!(2, d.snapshot().len());
}

#[test]
fn series_for_plotting() {
    let d = DisplayBuffer::new(10);
    d.push(group(4, vec![10, 20]));
    d.push(group(5, vec![]));
    d.push(group(6, vec![30]));

    let snap = d.snapshot();
    assert_eq!(vec![(4, 10), (4, 20), (6, 30)], snap.series(2));
    assert!(snap.series(9).is_empty());
}

#[test]
fn zero_capacity_holds_one() {
    let d = DisplayBuffer::new(0);
    assert_eq!(1, d.capacity());
    assert!(d.is_empty());
    d.push(group(0, vec![]));
    d.push(group(1, vec![]));
    assert_eq!(Some(1..=1), d.snapshot().indices());
}
