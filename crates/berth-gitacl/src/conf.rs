//! Gitosis config model.
//!
//! The file is INI-shaped: `[group <name>]` sections with space-joined
//! multi-value options (`members`, `writable`). Anything that is not a
//! group section — comments, blank lines, foreign sections like
//! `[gitosis]` — is carried through verbatim, and untouched option
//! lines keep their original bytes, so rewriting the file never churns
//! content we do not own.

use crate::error::{AclError, AclResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclConfig {
    items: Vec<Item>,
    trailing_newline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Verbatim line outside any group section.
    Raw(String),
    Group(Group),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Group {
    name: String,
    /// Header line as read; canonical `[group <name>]` for new groups.
    header: String,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Option {
        key: String,
        values: Vec<String>,
        /// Original line, dropped once the option is modified.
        raw: Option<String>,
    },
    /// Comment or blank line inside a group section.
    Raw(String),
}

impl Group {
    fn option_index(&self, option: &str) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(entry, Entry::Option { key, .. } if key == option)
        })
    }
}

impl Default for AclConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AclConfig {
    /// An empty config, rendering as an empty file until populated.
    pub fn new() -> Self {
        Self { items: Vec::new(), trailing_newline: true }
    }

    /// Parse never fails: unrecognized content is preserved as raw
    /// lines and written back untouched.
    pub fn parse(input: &[u8]) -> Self {
        let text = String::from_utf8_lossy(input);
        let mut items = Vec::new();
        let mut current: Option<Group> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                if let Some(group) = current.take() {
                    items.push(Item::Group(group));
                }
                let inner = trimmed[1..trimmed.len() - 1].trim();
                if let Some(name) = inner.strip_prefix("group ") {
                    current = Some(Group {
                        name: name.trim().to_string(),
                        header: line.to_string(),
                        entries: Vec::new(),
                    });
                } else {
                    items.push(Item::Raw(line.to_string()));
                }
                continue;
            }

            match &mut current {
                Some(group) => {
                    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                        group.entries.push(Entry::Raw(line.to_string()));
                    } else if let Some((key, rest)) = line.split_once('=') {
                        group.entries.push(Entry::Option {
                            key: key.trim().to_string(),
                            values: rest.split_whitespace().map(str::to_string).collect(),
                            raw: Some(line.to_string()),
                        });
                    } else {
                        group.entries.push(Entry::Raw(line.to_string()));
                    }
                }
                None => items.push(Item::Raw(line.to_string())),
            }
        }
        if let Some(group) = current.take() {
            items.push(Item::Group(group));
        }

        Self {
            items,
            trailing_newline: input.is_empty() || input.ends_with(b"\n"),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut lines: Vec<String> = Vec::new();
        for item in &self.items {
            match item {
                Item::Raw(line) => lines.push(line.clone()),
                Item::Group(group) => {
                    lines.push(group.header.clone());
                    for entry in &group.entries {
                        match entry {
                            Entry::Raw(line) => lines.push(line.clone()),
                            Entry::Option { key, values, raw } => match raw {
                                Some(line) => lines.push(line.clone()),
                                None => lines.push(format!("{key} = {}", values.join(" "))),
                            },
                        }
                    }
                }
            }
        }
        let mut out = lines.join("\n").into_bytes();
        if self.trailing_newline && !out.is_empty() {
            out.push(b'\n');
        }
        out
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.find_group(name).is_some()
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                Item::Group(g) => Some(g.name.as_str()),
                Item::Raw(_) => None,
            })
            .collect()
    }

    pub fn add_group(&mut self, name: &str) -> AclResult<()> {
        if self.has_group(name) {
            return Err(AclError::GroupExists(name.to_string()));
        }
        self.items.push(Item::Group(Group {
            name: name.to_string(),
            header: format!("[group {name}]"),
            entries: Vec::new(),
        }));
        Ok(())
    }

    pub fn remove_group(&mut self, name: &str) -> AclResult<()> {
        let idx = self
            .items
            .iter()
            .position(|item| matches!(item, Item::Group(g) if g.name == name))
            .ok_or_else(|| AclError::GroupNotFound(name.to_string()))?;
        self.items.remove(idx);
        Ok(())
    }

    /// Append `value` to a space-joined option, creating the option on
    /// first use. Duplicate values are rejected.
    pub fn add_option_value(&mut self, group: &str, option: &str, value: &str) -> AclResult<()> {
        let g = self
            .find_group_mut(group)
            .ok_or_else(|| AclError::GroupNotFound(group.to_string()))?;
        match g.option_index(option) {
            Some(idx) => {
                let Entry::Option { values, raw, .. } = &mut g.entries[idx] else {
                    unreachable!("option_index only returns option entries");
                };
                if values.iter().any(|v| v == value) {
                    return Err(AclError::DuplicateValue {
                        group: group.to_string(),
                        option: option.to_string(),
                        value: value.to_string(),
                    });
                }
                values.push(value.to_string());
                *raw = None;
            }
            None => g.entries.push(Entry::Option {
                key: option.to_string(),
                values: vec![value.to_string()],
                raw: None,
            }),
        }
        Ok(())
    }

    /// Remove `value` from an option, preserving the order of the
    /// remaining values. The option disappears with its last value.
    pub fn remove_option_value(&mut self, group: &str, option: &str, value: &str) -> AclResult<()> {
        let g = self
            .find_group_mut(group)
            .ok_or_else(|| AclError::GroupNotFound(group.to_string()))?;
        let idx = g.option_index(option).ok_or_else(|| AclError::OptionNotSet {
            group: group.to_string(),
            option: option.to_string(),
        })?;
        let Entry::Option { values, raw, .. } = &mut g.entries[idx] else {
            unreachable!("option_index only returns option entries");
        };
        let Some(vpos) = values.iter().position(|v| v == value) else {
            return Err(AclError::ValueNotFound {
                group: group.to_string(),
                option: option.to_string(),
                value: value.to_string(),
            });
        };
        values.remove(vpos);
        if values.is_empty() {
            g.entries.remove(idx);
        } else {
            *raw = None;
        }
        Ok(())
    }

    pub fn option_values(&self, group: &str, option: &str) -> Option<&[String]> {
        let g = self.find_group(group)?;
        g.entries.iter().find_map(|entry| match entry {
            Entry::Option { key, values, .. } if key == option => Some(values.as_slice()),
            _ => None,
        })
    }

    fn find_group(&self, name: &str) -> Option<&Group> {
        self.items.iter().find_map(|item| match item {
            Item::Group(g) if g.name == name => Some(g),
            _ => None,
        })
    }

    fn find_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Group(g) if g.name == name => Some(g),
            _ => None,
        })
    }
}
