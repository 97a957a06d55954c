use std::path::{Path, PathBuf};

/// Label of synthetic plate `idx`; skewed toward healthy.
pub fn plate_label(idx: usize) -> u8 {
    u8::from((idx * 7) % 23 >= 9)
}

fn plate_row(idx: usize) -> [String; 5] {
    let thickness = (idx * 7) % 23;
    [
        format!("plate-{idx:04}"),
        thickness.to_string(),
        format!("{:.2}", ((idx * 13) % 31) as f32 / 3.0),
        format!("{:.1}", 250.0 + ((idx * 5) % 17) as f32),
        plate_label(idx).to_string(),
    ]
}

const HEADER: [&str; 5] = ["id", "thickness", "hardness", "temperature", "Healthy"];

/// Write `rows` synthetic plates as CSV.
pub fn write_plates_csv(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("steelplate.csv");
    let mut text = HEADER.join(",");
    text.push('\n');
    for idx in 0..rows {
        text.push_str(&plate_row(idx).join(","));
        text.push('\n');
    }
    std::fs::write(&path, text).expect("write plates csv");
    path
}

/// Write `rows` synthetic plates as JSON lines.
pub fn write_plates_jsonl(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("steelplate.jsonl");
    let mut text = String::new();
    for idx in 0..rows {
        let row = plate_row(idx);
        let mut record = serde_json::Map::new();
        record.insert(HEADER[0].into(), row[0].clone().into());
        for col in 1..4 {
            let value: f64 = row[col].parse().expect("numeric cell");
            record.insert(HEADER[col].into(), value.into());
        }
        record.insert(HEADER[4].into(), u64::from(plate_label(idx)).into());
        text.push_str(&serde_json::Value::Object(record).to_string());
        text.push('\n');
    }
    std::fs::write(&path, text).expect("write plates jsonl");
    path
}

/// Write a CSV without the label column.
pub fn write_unlabeled_csv(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("unlabeled.csv");
    let mut text = String::from("id,thickness,hardness,temperature\n");
    for idx in 0..rows {
        let row = plate_row(idx);
        text.push_str(&row[..4].join(","));
        text.push('\n');
    }
    std::fs::write(&path, text).expect("write unlabeled csv");
    path
}
