//! Both engines must present the same steps to a reader.

use std::sync::Arc;

use middleman_core::{Column, DType, StepReader, StepStatus, StepWriter, VariableDef};
use middleman_stream::{FileStepReader, FileStepWriter, StepFrame, StreamHub};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────

fn drain(reader: &mut dyn StepReader) -> Vec<Vec<(String, Vec<Column>)>> {
    let mut steps = Vec::new();
    loop {
        match reader.begin_step().unwrap() {
            StepStatus::Ok => {}
            StepStatus::EndOfStream => return steps,
            StepStatus::NotReady => panic!("closed stream reported NotReady"),
        }
        let mut vars = Vec::new();
        for name in ["table", "gid"] {
            let Some(info) = reader.inquire_variable(name).unwrap() else {
                continue;
            };
            for block in reader.blocks_info(name).unwrap() {
                reader.get(name, block.id).unwrap();
            }
            let data = reader.perform_gets().unwrap();
            assert_eq!(data.len(), info.block_count);
            vars.push((name.to_string(), data));
        }
        reader.end_step().unwrap();
        steps.push(vars);
    }
}

fn define(w: &mut dyn StepWriter) {
    w.define_variable(VariableDef::local("table", DType::F64, &[0, 2]))
        .unwrap();
    w.define_variable(VariableDef::local("gid", DType::I64, &[0]))
        .unwrap();
}

fn emit(w: &mut dyn StepWriter, rows: &[Vec<f64>]) {
    w.begin_step().unwrap();
    for (i, row) in rows.iter().enumerate() {
        let n = row.len() / 2;
        w.put("table", Column::F64(row[..n * 2].to_vec()), Some(&[n, 2]))
            .unwrap();
        w.put("gid", Column::I64(vec![i as i64; n]), Some(&[n]))
            .unwrap();
    }
    w.end_step().unwrap();
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("middleman-it-{}-{name}.steps", std::process::id()))
}

// ── Tests ───────────────────────────────────────────────────────

#[test]
fn concurrent_writers_publish_in_registration_order() {
    let hub = StreamHub::new();
    let mut writers: Vec<_> = (0..3).map(|_| hub.writer()).collect();
    let mut reader = hub.reader();

    std::thread::scope(|s| {
        for (k, w) in writers.iter_mut().enumerate() {
            s.spawn(move || {
                define(w);
                for step in 0..4 {
                    emit(w, &[vec![k as f64, step as f64]]);
                }
                w.close().unwrap();
            });
        }
    });

    let steps = drain(&mut reader);
    assert_eq!(steps.len(), 4);
    for (step, vars) in steps.iter().enumerate() {
        let (name, tables) = &vars[0];
        assert_eq!(name, "table");
        let expected: Vec<Column> = (0..3)
            .map(|k| Column::F64(vec![k as f64, step as f64]))
            .collect();
        assert_eq!(tables, &expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn file_and_hub_agree(
        steps in prop::collection::vec(
            prop::collection::vec(prop::collection::vec(-1e6f64..1e6, 0..8), 0..4),
            0..5,
        ),
    ) {
        let hub = StreamHub::new();
        let mut hub_writer = hub.writer();
        let path = temp_path("agree");
        let mut file_writer = FileStepWriter::create(&path).unwrap();
        define(&mut hub_writer);
        define(&mut file_writer);
        for rows in &steps {
            emit(&mut hub_writer, rows);
            emit(&mut file_writer, rows);
        }
        hub_writer.close().unwrap();
        file_writer.close().unwrap();

        let from_hub = drain(&mut hub.reader());
        let from_file = drain(&mut FileStepReader::open(&path).unwrap());
        std::fs::remove_file(&path).ok();
        prop_assert_eq!(from_hub.len(), steps.len());
        prop_assert_eq!(from_hub, from_file);

        let published: Vec<Arc<StepFrame>> = (0..steps.len() as u64)
            .filter_map(|i| hub.step(middleman_core::StepId(i)))
            .collect();
        prop_assert_eq!(published.len(), steps.len());
    }
}
