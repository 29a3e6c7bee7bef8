//! Topology file assembly and rendering
//!
//! The discovery run produces one [`DeviceRecord`] per relay channel; this
//! module turns that list into the persisted topology representation: an
//! ordered set of INI-style sections named `MODEL_<n>`, one per populated
//! relay socket.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::record::DeviceRecord;

/// Errors that can occur during topology file operations
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One section of the topology file: a name and its flat key/value entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

/// Assembled topology, ready to render or persist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyFile {
    pub sections: Vec<TopologySection>,
}

impl TopologyFile {
    /// Build the topology from discovery records.
    ///
    /// Records without a model are dropped: lack of a model generally means
    /// the relay socket was unused. The rest keep their input order and are
    /// numbered per model, so two `minnowboard` records become sections
    /// `MINNOWBOARD_1` and `MINNOWBOARD_2`.
    pub fn assemble(records: &[DeviceRecord]) -> Self {
        let mut counters: HashMap<String, u32> = HashMap::new();
        let mut sections = Vec::new();

        for record in records {
            let model = match &record.model {
                Some(model) => model,
                None => {
                    debug!(record = ?record.cutter, "Skipping record without a model");
                    continue;
                }
            };

            let seq = counters.entry(model.clone()).or_insert(0);
            *seq += 1;

            sections.push(TopologySection {
                name: format!("{}_{}", model.to_uppercase(), seq),
                entries: record.to_entries(),
            });
        }

        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render in INI style: a `[NAME]` header per section, `key = value`
    /// lines, and a blank line after each section
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for (key, value) in &section.entries {
                out.push_str(&format!("{} = {}\n", key, value));
            }
            out.push('\n');
        }
        out
    }

    /// Write the rendered topology to a file
    pub fn to_file(&self, path: &Path) -> Result<(), TopologyError> {
        std::fs::write(path, self.render())?;
        info!(
            path = %path.display(),
            sections = self.sections.len(),
            "Wrote topology file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CutterLink, PortId};

    fn record(model: Option<&str>, cutter: &str) -> DeviceRecord {
        let mut r = DeviceRecord::new();
        r.set_cutter(CutterLink::new(cutter, Some("0".to_string())));
        r.model = model.map(|m| m.to_string());
        r
    }

    #[test]
    fn test_model_less_records_are_dropped() {
        let mut with_model = record(Some("joule"), "100");
        with_model.id = Some("aa:bb:cc:dd:ee:01".to_string());
        let without_model = record(None, "101");

        let topology = TopologyFile::assemble(&[with_model, without_model]);
        assert_eq!(topology.sections.len(), 1);
        assert_eq!(topology.sections[0].name, "JOULE_1");
    }

    #[test]
    fn test_per_model_numbering_in_input_order() {
        let mut first = record(Some("foo"), "100");
        first.id = Some("aa:bb:cc:dd:ee:01".to_string());
        let mut second = record(Some("foo"), "101");
        second.id = Some("aa:bb:cc:dd:ee:02".to_string());
        let bar = record(Some("bar"), "102");

        let topology = TopologyFile::assemble(&[first, second, bar]);
        let names: Vec<&str> = topology.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["FOO_1", "FOO_2", "BAR_1"]);
        assert_eq!(topology.sections[0].entries[3].1, "aa:bb:cc:dd:ee:01");
        assert_eq!(topology.sections[1].entries[3].1, "aa:bb:cc:dd:ee:02");
    }

    #[test]
    fn test_render_ini_layout() {
        let mut r = record(Some("minnowboard"), "563412");
        r.attribute_serial(&PortId::new("ttyUSB2"));
        let topology = TopologyFile::assemble(&[r]);

        let rendered = topology.render();
        let expected = "[MINNOWBOARD_1]\n\
                        cutter = 563412\n\
                        channel = 0\n\
                        model = minnowboard\n\
                        serial_port = /dev/ttyUSB2\n\
                        serial_bauds = 115200\n\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.cfg");

        let topology = TopologyFile::assemble(&[record(Some("joule"), "42")]);
        topology.to_file(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[JOULE_1]\n"));
        assert!(written.contains("cutter = 42\n"));
    }

    #[test]
    fn test_empty_input_renders_empty() {
        let topology = TopologyFile::assemble(&[]);
        assert!(topology.is_empty());
        assert_eq!(topology.render(), "");
    }
}
