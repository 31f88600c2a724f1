use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use serde_json::{json, Value};

use sack::scheduler::GreedyScheduler;
use sack_collection::dataframe::{Column, ColumnKind, MemoryTable, Schema, TabularSink, Table};
use sack_collection::sources::{read_text, Compression};
use sack_collection::{Bag, BagError};

fn pattern(dir: &Path, glob: &str) -> String {
    dir.join(glob).to_str().unwrap().to_owned()
}

#[test]
fn reads_files_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.txt"), "three\nfour\n").unwrap();
    fs::write(dir.path().join("a.txt"), "one\r\ntwo").unwrap();
    fs::write(dir.path().join("c.txt"), "five\n").unwrap();

    let bag = read_text(&pattern(dir.path(), "*.txt"), 2, Compression::Auto).unwrap();
    assert_eq!(bag.n_partitions(), 2);
    assert_eq!(bag.eval().unwrap(), vec!["one", "two", "three", "four", "five"]);
}

#[test]
fn reads_compressed_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut gz = GzEncoder::new(File::create(dir.path().join("part-0.gz")).unwrap(),
                                flate2::Compression::default());
    gz.write_all(b"alpha\nbeta\n").unwrap();
    gz.finish().unwrap();

    let mut sz = snap::write::FrameEncoder::new(File::create(dir.path().join("part-1.sz")).unwrap());
    sz.write_all(b"gamma\ndelta\n").unwrap();
    sz.flush().unwrap();
    drop(sz);

    let bag = read_text(&pattern(dir.path(), "part-*"), 1, Compression::Auto).unwrap();
    assert_eq!(bag.eval().unwrap(), vec!["alpha", "beta", "gamma", "delta"]);
}

#[test]
fn explicit_compression_overrides_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mut gz = GzEncoder::new(File::create(dir.path().join("data.log")).unwrap(),
                                flate2::Compression::fast());
    gz.write_all(b"hidden\n").unwrap();
    gz.finish().unwrap();

    let bag = read_text(&pattern(dir.path(), "*.log"), 1, Compression::Gzip).unwrap();
    assert_eq!(bag.eval().unwrap(), vec!["hidden"]);
}

#[test]
fn missing_source_fails_before_running() {
    let dir = tempfile::tempdir().unwrap();
    match read_text(&pattern(dir.path(), "*.csv"), 1, Compression::Auto) {
        Err(BagError::SourceNotFound { pattern }) => assert!(pattern.ends_with("*.csv")),
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("expected no matches"),
    }
    assert!(matches!(read_text("[", 1, Compression::Auto), Err(BagError::Pattern(_))));
}

#[test]
fn plucks_fields() {
    let people = Bag::from_sequence(vec![
        json!({"name": "Alice", "age": 31}),
        json!({"name": "Bob"}),
        json!({"name": "Carol", "age": 27}),
    ], 2);
    assert_eq!(people.pluck("name").eval().unwrap(), vec![json!("Alice"), json!("Bob"), json!("Carol")]);
    assert_eq!(people.pluck_or("age", Value::Null).eval().unwrap(), vec![json!(31), Value::Null, json!(27)]);
    match people.pluck("age").eval() {
        Err(BagError::FieldAccess(e)) => assert_eq!(e.field, "age"),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn infers_a_table() {
    let rows = Bag::from_sequence(vec![
        json!({"id": 1, "score": null, "tag": "x"}),
        json!({"id": 2, "score": 1.5, "tag": "y"}),
        json!({"id": 3, "score": 2, "tag": "z"}),
    ], 3);
    let table = rows.to_dataframe(&GreedyScheduler::new(), &mut MemoryTable, None).unwrap();
    assert_eq!(table.schema.names(), vec!["id", "score", "tag"]);
    assert_eq!(table.schema.columns[1].kind, ColumnKind::Float);
    assert_eq!(table.column("tag").unwrap(), vec![&json!("x"), &json!("y"), &json!("z")]);
}

#[test]
fn explicit_schema_projects_rows() {
    let rows = Bag::from_vec(vec![json!({"a": 1, "b": true}), json!({"a": 2})]);
    let schema = Schema::new(vec![Column::new("b", ColumnKind::Bool), Column::new("a", ColumnKind::Int)]);
    let table = rows.to_dataframe(&GreedyScheduler::new(), &mut MemoryTable, Some(schema)).unwrap();
    assert_eq!(table.rows, vec![vec![json!(true), json!(1)], vec![Value::Null, json!(2)]]);
}

#[test]
fn heterogeneous_rows_do_not_infer() {
    let rows = Bag::from_sequence(vec![json!({"a": 1}), json!({"a": "one"})], 2);
    match rows.to_dataframe(&GreedyScheduler::new(), &mut MemoryTable, None) {
        Err(BagError::SchemaInference(e)) => assert_eq!(e.row, 1),
        other => panic!("unexpected {:?}", other),
    }
}

struct CountingSink(usize);

impl TabularSink for CountingSink {
    type Output = usize;

    fn accept(&mut self, _schema: Schema, rows: Vec<Vec<Value>>) -> Result<usize, BagError> {
        self.0 += rows.len();
        Ok(self.0)
    }
}

#[test]
fn custom_sinks_receive_rows() {
    let mut sink = CountingSink(0);
    let rows = Bag::from_vec(vec![json!({"a": 1}), json!({"a": 2})]);
    assert_eq!(rows.to_dataframe(&GreedyScheduler::new(), &mut sink, None).unwrap(), 2);
    assert_eq!(rows.to_dataframe(&GreedyScheduler::new(), &mut sink, None).unwrap(), 4);

    let empty: Bag<Value> = Bag::from_defs(Vec::new());
    let table: Table = empty.to_dataframe(&GreedyScheduler::new(), &mut MemoryTable, None).unwrap();
    assert_eq!(table.n_rows(), 0);
}
