use chrono::{TimeZone, Utc};
use ppstools::{de, ser, ChannelOffsets, Group, Record, SensorSnapshot};
use std::sync::Arc;

fn group(index: u64, a: Vec<i64>, b: Vec<i64>) -> Arc<Group> {
    let label = Utc.with_ymd_and_hms(2021, 6, 18, 13, 14, 53).unwrap()
        + chrono::Duration::microseconds(250);
    Arc::new(Group::new(
        index,
        label,
        0,
        Some(1_000_000_000_000),
        vec![
            ChannelOffsets { channel: 2, offsets: a },
            ChannelOffsets { channel: -3, offsets: b },
        ],
    ))
}

/// Write a header and two rows, then read the rows back
#[test]
fn write_and_read_records() {
    let names = vec![String::from("Rb"), String::from("Channel -3")];
    let mut b: Vec<u8> = Vec::new();
    {
        let mut wtr = ser::writer(&mut b);
        ser::header(&mut wtr, &names, &[]).unwrap();
        ser::record(&mut wtr, &Record { group: group(7, vec![200, 900], vec![]), sensors: None }).unwrap();
        ser::record(&mut wtr, &Record { group: group(8, vec![-5], vec![42]), sensors: None }).unwrap();
        wtr.flush().unwrap();
    }
    let text = String::from_utf8(b.clone()).unwrap();
    let mut lines = text.lines();
    assert_eq!(Some("UTC,Index,Rb,Channel -3"), lines.next());
    assert_eq!(Some("2021-06-18T13:14:53.000250Z,7,200;900,"), lines.next());
    assert_eq!(Some("2021-06-18T13:14:53.000250Z,8,-5,42"), lines.next());

    let mut rdr = de::reader(&*b);
    let rows = de::records(&mut rdr, 2).unwrap();
    assert_eq!(2, rows.len());
    assert_eq!(7, rows[0].index);
    assert_eq!(vec![vec![200, 900], vec![]], rows[0].offsets);
    assert_eq!(vec![vec![-5], vec![42]], rows[1].offsets);
    assert_eq!(group(7, vec![], vec![]).label(), rows[0].label);
}

#[test]
fn sensor_columns_follow_channels() {
    let sensors = SensorSnapshot {
        fields: vec![
            (String::from("FPGA temperature"), String::from("41.5")),
            (String::from("Fan"), String::from("3200")),
        ],
    };
    let names = vec![String::from("Rb"), String::from("Cs")];
    let mut b: Vec<u8> = Vec::new();
    {
        let mut wtr = ser::writer(&mut b);
        let sensor_names: Vec<String> = sensors.names().map(String::from).collect();
        ser::header(&mut wtr, &names, &sensor_names).unwrap();
        ser::record(&mut wtr, &Record { group: group(0, vec![1], vec![2]), sensors: Some(sensors.clone()) }).unwrap();
        wtr.flush().unwrap();
    }
    let text = String::from_utf8(b.clone()).unwrap();
    assert!(text.starts_with("UTC,Index,Rb,Cs,FPGA temperature,Fan\n"));

    let rows = de::records(&mut de::reader(&*b), 2).unwrap();
    assert_eq!(vec![String::from("41.5"), String::from("3200")], rows[0].sensors);
}

#[test]
fn sensor_dump() {
    let dump = "FPGA temperature\t41.5\nFan\t3200\n\nbogus\n";
    let s = de::sensor_tsv(dump.as_bytes()).unwrap();
    assert_eq!(
        vec!["FPGA temperature", "Fan"],
        s.names().collect::<Vec<_>>()
    );
    assert_eq!(vec!["41.5", "3200"], s.values().collect::<Vec<_>>());
}

#[test]
fn rejects_garbage() {
    assert!(de::offset_list("1;x").is_err());
    assert!(de::label("yesterday").is_err());
    let b = b"UTC,Index,Rb\n2021-06-18T13:14:53.000000Z\n";
    assert!(de::records(&mut de::reader(&b[..]), 1).is_err());
}

#[test]
fn sensor_readings_follow_the_given_names() {
    let reading = SensorSnapshot {
        fields: vec![
            (String::from("Fan"), String::from("3200")),
            (String::from("Humidity"), String::from("12")),
        ],
    };
    let names = vec![String::from("FPGA temperature"), String::from("Fan")];
    let s = reading.select(&names);
    assert_eq!(vec!["FPGA temperature", "Fan"], s.names().collect::<Vec<_>>());
    assert_eq!(vec!["", "3200"], s.values().collect::<Vec<_>>());
}
