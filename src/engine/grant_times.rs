//! First-grant-time state per user, stored as XML.
//!
//! ```xml
//! <first-grant-times version="1">
//!   <package-permissions package="com.example.app" first-grant-time="1700000000000"/>
//!   <shared-user-permissions shared-user="shared.uid" first-grant-time="1700000000000"/>
//! </first-grant-times>
//! ```

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::collections::BTreeMap;
use std::path::Path;

use crate::utils::write_atomically;

const TAG_ROOT: &str = "first-grant-times";
const TAG_PACKAGE: &str = "package-permissions";
const TAG_SHARED_USER: &str = "shared-user-permissions";
const ATTR_VERSION: &str = "version";
const ATTR_PACKAGE: &str = "package";
const ATTR_SHARED_USER: &str = "shared-user";
const ATTR_FIRST_GRANT_TIME: &str = "first-grant-time";

pub const GRANT_TIME_XML_VERSION: i32 = 1;

/// Epoch-millis first-grant times by package and by shared user id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserGrantTimeState {
    pub version: i32,
    pub package_grant_times: BTreeMap<String, i64>,
    pub shared_user_grant_times: BTreeMap<String, i64>,
}

impl Default for UserGrantTimeState {
    fn default() -> Self {
        Self {
            version: GRANT_TIME_XML_VERSION,
            package_grant_times: BTreeMap::new(),
            shared_user_grant_times: BTreeMap::new(),
        }
    }
}

impl UserGrantTimeState {
    pub fn is_empty(&self) -> bool {
        self.package_grant_times.is_empty() && self.shared_user_grant_times.is_empty()
    }
}

fn attrs(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr.context("malformed attribute")?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().context("unescape attribute")?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

fn required_time(a: &BTreeMap<String, String>, tag: &str) -> Result<i64> {
    let raw = a
        .get(ATTR_FIRST_GRANT_TIME)
        .with_context(|| format!("<{tag}> missing {ATTR_FIRST_GRANT_TIME}"))?;
    raw.parse()
        .with_context(|| format!("<{tag}> has invalid {ATTR_FIRST_GRANT_TIME} {raw:?}"))
}

/// Parse grant-time XML from a string.
pub fn parse_grant_times_str(xml: &str) -> Result<UserGrantTimeState> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut state = UserGrantTimeState::default();
    let mut saw_root = false;

    loop {
        let event = reader.read_event().context("read grant-time XML")?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let a = attrs(e)?;
                match name.as_str() {
                    TAG_ROOT => {
                        saw_root = true;
                        if let Some(v) = a.get(ATTR_VERSION) {
                            state.version = v
                                .parse()
                                .with_context(|| format!("invalid grant-time version {v:?}"))?;
                        }
                    }
                    TAG_PACKAGE => {
                        let pkg = a
                            .get(ATTR_PACKAGE)
                            .with_context(|| format!("<{TAG_PACKAGE}> missing {ATTR_PACKAGE}"))?;
                        let t = required_time(&a, TAG_PACKAGE)?;
                        state.package_grant_times.insert(pkg.clone(), t);
                    }
                    TAG_SHARED_USER => {
                        let su = a.get(ATTR_SHARED_USER).with_context(|| {
                            format!("<{TAG_SHARED_USER}> missing {ATTR_SHARED_USER}")
                        })?;
                        let t = required_time(&a, TAG_SHARED_USER)?;
                        state.shared_user_grant_times.insert(su.clone(), t);
                    }
                    other => log::debug!("Ignoring unknown grant-time element <{}>", other),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !saw_root {
        bail!("grant-time XML has no <{TAG_ROOT}> element");
    }
    Ok(state)
}

/// Parse the grant-time file. A missing file is an empty state.
pub fn parse_grant_times(path: &Path) -> Result<UserGrantTimeState> {
    let xml = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(UserGrantTimeState::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("read grant-time file {}", path.display()));
        }
    };
    parse_grant_times_str(&xml).with_context(|| format!("parse {}", path.display()))
}

pub fn serialize_grant_times(state: &UserGrantTimeState) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;

    let version = state.version.to_string();
    let mut root = BytesStart::new(TAG_ROOT);
    root.push_attribute((ATTR_VERSION, version.as_str()));
    writer.write_event(Event::Start(root))?;

    for (pkg, t) in &state.package_grant_times {
        let t = t.to_string();
        let mut el = BytesStart::new(TAG_PACKAGE);
        el.push_attribute((ATTR_PACKAGE, pkg.as_str()));
        el.push_attribute((ATTR_FIRST_GRANT_TIME, t.as_str()));
        writer.write_event(Event::Empty(el))?;
    }
    for (su, t) in &state.shared_user_grant_times {
        let t = t.to_string();
        let mut el = BytesStart::new(TAG_SHARED_USER);
        el.push_attribute((ATTR_SHARED_USER, su.as_str()));
        el.push_attribute((ATTR_FIRST_GRANT_TIME, t.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    writer.write_event(Event::End(BytesEnd::new(TAG_ROOT)))?;
    Ok(writer.into_inner())
}

/// Write the grant-time file atomically.
pub fn write_grant_times(path: &Path, state: &UserGrantTimeState) -> Result<()> {
    let bytes = serialize_grant_times(state)?;
    write_atomically(path, &bytes)
}

/// Fold restored grant times into the live ones: the earliest first-grant time wins, and
/// entries only present in the restored state are adopted. Returns how many entries changed.
pub fn merge_grant_times(live: &mut UserGrantTimeState, restored: &UserGrantTimeState) -> usize {
    fn fold(live: &mut BTreeMap<String, i64>, restored: &BTreeMap<String, i64>) -> usize {
        let mut changed = 0;
        for (k, &t) in restored {
            match live.get(k) {
                Some(&cur) if cur <= t => {}
                _ => {
                    live.insert(k.clone(), t);
                    changed += 1;
                }
            }
        }
        changed
    }
    fold(&mut live.package_grant_times, &restored.package_grant_times)
        + fold(
            &mut live.shared_user_grant_times,
            &restored.shared_user_grant_times,
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_written_document() {
        let mut state = UserGrantTimeState::default();
        state
            .package_grant_times
            .insert("com.example.steps".into(), 1_700_000_000_000);
        state
            .shared_user_grant_times
            .insert("shared&uid".into(), 1_600_000_000_000);
        let bytes = serialize_grant_times(&state).unwrap();
        let parsed = parse_grant_times_str(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn rejects_missing_time() {
        let xml = r#"<first-grant-times version="1"><package-permissions package="a"/></first-grant-times>"#;
        assert!(parse_grant_times_str(xml).is_err());
    }

    #[test]
    fn rejects_document_without_root() {
        assert!(parse_grant_times_str("<other/>").is_err());
    }

    #[test]
    fn merge_keeps_earliest() {
        let mut live = UserGrantTimeState::default();
        live.package_grant_times.insert("a".into(), 100);
        live.package_grant_times.insert("b".into(), 50);
        let mut restored = UserGrantTimeState::default();
        restored.package_grant_times.insert("a".into(), 10);
        restored.package_grant_times.insert("b".into(), 60);
        restored.package_grant_times.insert("c".into(), 70);

        let changed = merge_grant_times(&mut live, &restored);

        assert_eq!(changed, 2);
        assert_eq!(live.package_grant_times["a"], 10);
        assert_eq!(live.package_grant_times["b"], 50);
        assert_eq!(live.package_grant_times["c"], 70);
    }
}
