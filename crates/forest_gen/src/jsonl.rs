//! The newline-delimited JSON surface.
//!
//! Two line shapes: evaluation paths, then node labels for every id the
//! paths reference. Readers must tolerate unknown top-level fields and
//! skip lines whose `type` they do not recognize; [`parse_line`] is the
//! reference reader and behaves exactly that way.

use serde::{Deserialize, Serialize};
use skiarena_eval::EvalPath;
use std::io::Write;

/// One rewrite edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub from: u32,
    pub to: u32,
}

/// One evaluation path line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecord {
    pub expr: String,
    pub source: u32,
    pub sink: u32,
    pub steps: Vec<StepRecord>,
    pub reached_normal_form: bool,
    pub steps_taken: u32,
}

impl From<&EvalPath> for PathRecord {
    fn from(path: &EvalPath) -> Self {
        Self {
            expr: path.expr.clone(),
            source: path.source,
            sink: path.sink,
            steps: path
                .steps
                .iter()
                .map(|&(from, to)| StepRecord { from, to })
                .collect(),
            reached_normal_form: path.reached_normal_form,
            steps_taken: path.steps_taken,
        }
    }
}

/// One node label line, emitted after all paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLabelRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u32,
    pub label: String,
}

impl NodeLabelRecord {
    pub const TYPE: &'static str = "nodeLabel";

    pub fn new(id: u32, label: String) -> Self {
        Self {
            kind: Self::TYPE.to_string(),
            id,
            label,
        }
    }
}

/// A parsed forest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestLine {
    Path(PathRecord),
    NodeLabel(NodeLabelRecord),
    /// A line whose `type` is not recognized; readers skip these.
    Unknown,
}

/// Parses one JSONL line, skipping unrecognized `type`s.
pub fn parse_line(line: &str) -> Result<ForestLine, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    match value.get("type").and_then(|t| t.as_str()) {
        None => Ok(ForestLine::Path(serde_json::from_value(value)?)),
        Some(NodeLabelRecord::TYPE) => Ok(ForestLine::NodeLabel(serde_json::from_value(value)?)),
        Some(_) => Ok(ForestLine::Unknown),
    }
}

/// Writes forest lines to any byte sink.
pub struct JsonlWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_path(&mut self, record: &PathRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }

    pub fn write_label(&mut self, record: &NodeLabelRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_path() -> PathRecord {
        PathRecord {
            expr: "SKK".to_string(),
            source: 3,
            sink: 9,
            steps: vec![StepRecord { from: 3, to: 7 }, StepRecord { from: 7, to: 9 }],
            reached_normal_form: true,
            steps_taken: 2,
        }
    }

    #[test]
    fn path_lines_use_camel_case() {
        let json = serde_json::to_string(&sample_path()).unwrap();
        assert!(json.contains("\"reachedNormalForm\":true"), "{json}");
        assert!(json.contains("\"stepsTaken\":2"), "{json}");
        assert!(!json.contains("reached_normal_form"));
    }

    #[test]
    fn path_round_trips() {
        let json = serde_json::to_string(&sample_path()).unwrap();
        match parse_line(&json).unwrap() {
            ForestLine::Path(p) => assert_eq!(p, sample_path()),
            other => panic!("expected a path line, got {other:?}"),
        }
    }

    #[test]
    fn label_round_trips_with_type_tag() {
        let label = NodeLabelRecord::new(9, "I".to_string());
        let json = serde_json::to_string(&label).unwrap();
        assert!(json.contains("\"type\":\"nodeLabel\""), "{json}");
        match parse_line(&json).unwrap() {
            ForestLine::NodeLabel(l) => assert_eq!(l, label),
            other => panic!("expected a label line, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_skipped_not_an_error() {
        let line = r#"{"type":"heartbeat","seq":42}"#;
        assert_eq!(parse_line(line).unwrap(), ForestLine::Unknown);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let line = r#"{"expr":"I","source":1,"sink":1,"steps":[],
            "reachedNormalForm":true,"stepsTaken":0,"futureField":123}"#
            .replace('\n', " ");
        match parse_line(&line).unwrap() {
            ForestLine::Path(p) => assert_eq!(p.expr, "I"),
            other => panic!("expected a path line, got {other:?}"),
        }
    }

    #[test]
    fn writer_emits_one_object_per_line() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer.write_path(&sample_path()).unwrap();
        writer
            .write_label(&NodeLabelRecord::new(3, "SKK".into()))
            .unwrap();
        let bytes = writer.into_inner();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            assert!(parse_line(line).is_ok());
        }
    }
}
