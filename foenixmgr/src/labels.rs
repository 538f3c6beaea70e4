//! Assembler label files.
//!
//! The 64tass-style listing written next to a kernel build maps symbols to
//! addresses, one per line:
//!
//! ```text
//! BOOT_VECTOR     = $00FF00
//! KERNEL_VERSION  = $38FFF0
//! ```
//!
//! Lines that do not look like `NAME = $HEX` are ignored.

use {
    crate::error::{Error, Result},
    std::{collections::HashMap, fs, path::Path},
};

/// Symbol table loaded from a label file.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: HashMap<String, u32>,
}

impl LabelTable {
    /// Load a label file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read label file {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse the text of a label file.
    ///
    /// When a name is defined more than once the first definition wins.
    pub fn parse(text: &str) -> Self {
        let mut labels = HashMap::new();
        for (name, address) in text.lines().filter_map(parse_line) {
            labels.entry(name.to_string()).or_insert(address);
        }
        Self { labels }
    }

    /// Address of `label`.
    pub fn lookup(&self, label: &str) -> Result<u32> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::Config(format!("no definition for label '{label}'")))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels
            .len()
    }

    /// Whether the table holds no labels.
    pub fn is_empty(&self) -> bool {
        self.labels
            .is_empty()
    }
}

/// The name must start the line.
fn parse_line(line: &str) -> Option<(&str, u32)> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }

    let digits = value
        .trim_start()
        .strip_prefix('$')?;
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    let address = u32::from_str_radix(&digits[..end], 16).ok()?;
    Some((name, address))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
; 64tass listing
BOOT_VECTOR     = $00FF00
KERNEL_VERSION=$38fff0
SCREEN_WIDTH    = 80
CURSORPOS       = $0017 ; cursor position
BOOT_VECTOR     = $123456
";

    #[test]
    fn test_lookup() {
        let labels = LabelTable::parse(LISTING);
        assert_eq!(labels.lookup("BOOT_VECTOR").unwrap(), 0x00FF00);
        assert_eq!(labels.lookup("KERNEL_VERSION").unwrap(), 0x38FFF0);
        assert_eq!(labels.lookup("CURSORPOS").unwrap(), 0x0017);
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_decimal_and_missing_labels() {
        let labels = LabelTable::parse(LISTING);
        assert!(matches!(labels.lookup("SCREEN_WIDTH"), Err(Error::Config(_))));
        assert!(matches!(labels.lookup("boot_vector"), Err(Error::Config(_))));
    }

    #[test]
    fn test_indented_line_is_not_a_label() {
        let labels = LabelTable::parse("    INDENTED = $1234\n\tTABBED = $5678\nTOP = $9ABC\n");
        assert!(matches!(labels.lookup("INDENTED"), Err(Error::Config(_))));
        assert!(matches!(labels.lookup("TABBED"), Err(Error::Config(_))));
        assert_eq!(labels.lookup("TOP").unwrap(), 0x9ABC);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.lbl");
        fs::write(&path, LISTING).unwrap();
        assert_eq!(
            LabelTable::from_file(&path)
                .unwrap()
                .lookup("KERNEL_VERSION")
                .unwrap(),
            0x38FFF0
        );

        assert!(matches!(
            LabelTable::from_file(dir.path().join("missing.lbl")),
            Err(Error::Config(_))
        ));
    }
}
