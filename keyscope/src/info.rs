//! `INFO` reply parsing
//!
//! An `INFO` reply is a text block of `# Section` headers followed by
//! `field:value` lines. The keyspace section carries one line per logical
//! database:
//!
//! ```text
//! # Keyspace
//! db0:keys=10,expires=2,avg_ttl=0
//! ```

use keyscope_core::error::{RedisError, RedisResult};
use std::collections::{BTreeMap, HashMap};

/// Fields kept from each keyspace line
pub const KEYSPACE_FIELDS: &[&str] = &["keys", "expires", "avg_ttl"];

/// Split `a=1,b=2` style text into a map
///
/// Items without `delimiter` are skipped; later duplicates win.
pub fn convert_bulk_string_to_map(
    text: &str,
    separator: char,
    delimiter: char,
) -> HashMap<String, String> {
    text.split(separator)
        .filter_map(|item| item.split_once(delimiter))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// One `# Title` block of an INFO reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoSection {
    title: String,
    fields: Vec<(String, String)>,
}

impl InfoSection {
    /// Header as sent by the server, e.g. `Keyspace`
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Lower-cased section name used for lookups
    pub fn name(&self) -> String {
        self.title.to_ascii_lowercase()
    }

    /// Field/value pairs in reply order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Value of a field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }
}

/// Parsed `INFO` reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoReply {
    sections: Vec<InfoSection>,
}

impl InfoReply {
    /// Parse INFO text; lines before the first header land in an untitled section
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<InfoSection> = Vec::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            if let Some(title) = line.strip_prefix('#') {
                sections.push(InfoSection {
                    title: title.trim().to_string(),
                    fields: Vec::new(),
                });
                continue;
            }

            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            if sections.is_empty() {
                sections.push(InfoSection {
                    title: String::new(),
                    fields: Vec::new(),
                });
            }
            if let Some(section) = sections.last_mut() {
                section.fields.push((field.to_string(), value.to_string()));
            }
        }

        Self { sections }
    }

    /// All sections in reply order
    pub fn sections(&self) -> &[InfoSection] {
        &self.sections
    }

    /// Section by case-insensitive name
    pub fn section(&self, name: &str) -> Option<&InfoSection> {
        self.sections
            .iter()
            .find(|section| section.title.eq_ignore_ascii_case(name))
    }

    /// Value of `field` in `section`
    pub fn get(&self, section: &str, field: &str) -> Option<&str> {
        self.section(section)?.get(field)
    }

    /// Replace (or append) a section
    pub fn set_section(&mut self, section: InfoSection) {
        match self
            .sections
            .iter_mut()
            .find(|s| s.title.eq_ignore_ascii_case(&section.title))
        {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    /// Render back to INFO text with CRLF line endings
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push_str("\r\n");
            }
            if !section.title.is_empty() {
                out.push_str("# ");
                out.push_str(&section.title);
                out.push_str("\r\n");
            }
            for (field, value) in &section.fields {
                out.push_str(field);
                out.push(':');
                out.push_str(value);
                out.push_str("\r\n");
            }
        }
        out
    }
}

/// Per-database statistics from the keyspace section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyspaceInfo {
    databases: BTreeMap<u32, HashMap<String, String>>,
}

impl KeyspaceInfo {
    /// Parse a whole INFO reply (or just its keyspace section)
    pub fn parse(text: &str) -> Self {
        Self::from_info(&InfoReply::parse(text))
    }

    /// Build from the keyspace section, keeping [`KEYSPACE_FIELDS`]
    pub fn from_info(info: &InfoReply) -> Self {
        Self::from_info_with_fields(info, KEYSPACE_FIELDS)
    }

    /// Build from the keyspace section keeping only `fields`
    pub fn from_info_with_fields(info: &InfoReply, fields: &[&str]) -> Self {
        let mut databases = BTreeMap::new();
        let Some(section) = info.section("keyspace") else {
            return Self { databases };
        };

        for (name, value) in section.fields() {
            let Some(index) = parse_db_name(name) else {
                continue;
            };
            let mut stats = convert_bulk_string_to_map(value, ',', '=');
            stats.retain(|field, _| fields.contains(&field.as_str()));
            databases.insert(index, stats);
        }

        Self { databases }
    }

    /// Stats of `dbN` by index
    pub fn database(&self, index: u32) -> Option<&HashMap<String, String>> {
        self.databases.get(&index)
    }

    /// Stats by name (`db0`, `db1`, ...)
    pub fn get(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.database(parse_db_name(name)?)
    }

    /// Indexes reported by the server, ascending
    pub fn indexes(&self) -> impl Iterator<Item = u32> + '_ {
        self.databases.keys().copied()
    }

    /// Whether no database was reported
    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }

    /// Number of keys in `dbN`
    ///
    /// An index the server did not report holds no keys, so it counts as 0.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Parse`] if the database is listed without a
    /// numeric `keys` field.
    pub fn key_count(&self, index: u32) -> RedisResult<u64> {
        let Some(stats) = self.database(index) else {
            return Ok(0);
        };
        let keys = stats
            .get("keys")
            .ok_or_else(|| RedisError::Parse(format!("db{} has no keys field", index)))?;
        keys.parse::<u64>()
            .map_err(|e| RedisError::Parse(format!("Invalid key count {:?}: {}", keys, e)))
    }

    /// Combine per-node keyspaces of a cluster
    ///
    /// `keys` and `expires` are summed, `avg_ttl` is averaged weighted by
    /// each node's key count.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a KeyspaceInfo>) -> Self {
        #[derive(Default)]
        struct Totals {
            keys: u64,
            expires: u64,
            ttl_weighted: u128,
        }

        let mut totals: BTreeMap<u32, Totals> = BTreeMap::new();
        for part in parts {
            for (index, stats) in &part.databases {
                let field = |name: &str| {
                    stats
                        .get(name)
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(0)
                };
                let keys = field("keys");
                let entry = totals.entry(*index).or_default();
                entry.keys += keys;
                entry.expires += field("expires");
                entry.ttl_weighted += u128::from(field("avg_ttl")) * u128::from(keys);
            }
        }

        let databases = totals
            .into_iter()
            .map(|(index, t)| {
                let avg_ttl = if t.keys == 0 {
                    0
                } else {
                    t.ttl_weighted / u128::from(t.keys)
                };
                let stats = HashMap::from([
                    ("keys".to_string(), t.keys.to_string()),
                    ("expires".to_string(), t.expires.to_string()),
                    ("avg_ttl".to_string(), avg_ttl.to_string()),
                ]);
                (index, stats)
            })
            .collect();

        Self { databases }
    }

    /// Keyspace as an INFO section
    pub fn to_section(&self) -> InfoSection {
        let fields = self
            .databases
            .iter()
            .map(|(index, stats)| {
                let mut parts: Vec<String> = KEYSPACE_FIELDS
                    .iter()
                    .filter_map(|f| stats.get(*f).map(|v| format!("{}={}", f, v)))
                    .collect();
                let mut extra: Vec<String> = stats
                    .iter()
                    .filter(|(f, _)| !KEYSPACE_FIELDS.contains(&f.as_str()))
                    .map(|(f, v)| format!("{}={}", f, v))
                    .collect();
                extra.sort();
                parts.extend(extra);
                (format!("db{}", index), parts.join(","))
            })
            .collect();

        InfoSection {
            title: "Keyspace".to_string(),
            fields,
        }
    }
}

/// Merge INFO replies from several cluster nodes
///
/// The first reply supplies every section except the keyspace, which is
/// summed over all replies.
pub fn merge_info_replies(replies: &[String]) -> String {
    let parsed: Vec<InfoReply> = replies.iter().map(|text| InfoReply::parse(text)).collect();
    let keyspaces: Vec<KeyspaceInfo> = parsed.iter().map(KeyspaceInfo::from_info).collect();

    let mut merged = parsed.into_iter().next().unwrap_or_default();
    merged.set_section(KeyspaceInfo::merge(&keyspaces).to_section());
    merged.render()
}

fn parse_db_name(name: &str) -> Option<u32> {
    name.strip_prefix("db")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_INFO: &str = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\n\r\n# Keyspace\r\ndb0:keys=10,expires=2,avg_ttl=0\r\ndb3:keys=42,expires=0,avg_ttl=0,subexpiry=0\r\n";

    #[test]
    fn test_convert_bulk_string_to_map() {
        let map = convert_bulk_string_to_map("keys=10,expires=2,avg_ttl=0", ',', '=');
        assert_eq!(map.get("keys").map(String::as_str), Some("10"));
        assert_eq!(map.get("expires").map(String::as_str), Some("2"));
        assert_eq!(map.get("avg_ttl").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_convert_bulk_string_tolerates_junk() {
        let map = convert_bulk_string_to_map("keys=1,,novalue, spaced = x ", ',', '=');
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("spaced").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_parse_sections() {
        let info = InfoReply::parse(SERVER_INFO);
        assert_eq!(info.sections().len(), 2);
        assert_eq!(info.get("server", "redis_version"), Some("7.2.4"));
        assert_eq!(info.get("SERVER", "redis_mode"), Some("standalone"));
        assert_eq!(info.section("keyspace").unwrap().name(), "keyspace");
        assert_eq!(info.get("keyspace", "db0"), Some("keys=10,expires=2,avg_ttl=0"));
    }

    #[test]
    fn test_parse_keeps_values_with_colons() {
        let info = InfoReply::parse("# Server\nexecutable:/usr/bin/redis-server\nconfig_file:C:\\redis.conf\n");
        assert_eq!(info.get("server", "config_file"), Some("C:\\redis.conf"));
    }

    #[test]
    fn test_fields_before_header() {
        let info = InfoReply::parse("db0:keys=5,expires=0,avg_ttl=0\n");
        assert_eq!(info.sections()[0].title(), "");
        assert!(KeyspaceInfo::from_info(&info).is_empty());
    }

    #[test]
    fn test_keyspace_info_keeps_requested_fields() {
        let keyspace = KeyspaceInfo::parse(SERVER_INFO);
        assert_eq!(keyspace.indexes().collect::<Vec<_>>(), vec![0, 3]);

        let db3 = keyspace.get("db3").unwrap();
        assert_eq!(db3.get("keys").map(String::as_str), Some("42"));
        assert!(db3.get("subexpiry").is_none());

        let only_keys = KeyspaceInfo::from_info_with_fields(&InfoReply::parse(SERVER_INFO), &["keys"]);
        assert_eq!(only_keys.database(0).unwrap().len(), 1);
    }

    #[test]
    fn test_key_count() {
        let keyspace = KeyspaceInfo::parse(SERVER_INFO);
        assert_eq!(keyspace.key_count(3).unwrap(), 42);
        assert_eq!(keyspace.key_count(5).unwrap(), 0);

        let broken = KeyspaceInfo::parse("# Keyspace\ndb1:expires=3\ndb2:keys=lots\n");
        assert!(broken.key_count(1).is_err());
        assert!(broken.key_count(2).is_err());
    }

    #[test]
    fn test_merge_sums_nodes() {
        let a = KeyspaceInfo::parse("# Keyspace\ndb0:keys=10,expires=1,avg_ttl=100\n");
        let b = KeyspaceInfo::parse("# Keyspace\ndb0:keys=30,expires=4,avg_ttl=200\n");
        let merged = KeyspaceInfo::merge([&a, &b]);

        let db0 = merged.database(0).unwrap();
        assert_eq!(db0.get("keys").map(String::as_str), Some("40"));
        assert_eq!(db0.get("expires").map(String::as_str), Some("5"));
        assert_eq!(db0.get("avg_ttl").map(String::as_str), Some("175"));
    }

    #[test]
    fn test_merge_info_replies_rewrites_keyspace_only() {
        let node_a = "# Server\r\nredis_mode:cluster\r\n\r\n# Keyspace\r\ndb0:keys=3,expires=0,avg_ttl=0\r\n".to_string();
        let node_b = "# Server\r\nredis_mode:cluster\r\n\r\n# Keyspace\r\ndb0:keys=4,expires=1,avg_ttl=0\r\n".to_string();
        let node_c = "# Server\r\nredis_mode:cluster\r\n".to_string();

        let merged = InfoReply::parse(&merge_info_replies(&[node_a, node_b, node_c]));
        assert_eq!(merged.get("server", "redis_mode"), Some("cluster"));
        assert_eq!(KeyspaceInfo::from_info(&merged).key_count(0).unwrap(), 7);
    }

    #[test]
    fn test_render_roundtrips_sections() {
        let info = InfoReply::parse(SERVER_INFO);
        assert_eq!(InfoReply::parse(&info.render()), info);
    }
}
