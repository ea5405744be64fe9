use chrono::{Days, NaiveDate};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const PLACEHOLDER_PREFIX: &str = "TMP-";

/// Spreadsheet day-number epoch (the 1900 system, with its phantom leap day
/// folded in by anchoring at 1899-12-30).
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
const SERIAL_MIN: i64 = 1828; // ~1905-01-01
const SERIAL_MAX: i64 = 73050; // ~2099-12-31

pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

pub fn placeholder_id(batch_millis: i64, row_index: usize) -> String {
    format!("{}{}-{}", PLACEHOLDER_PREFIX, batch_millis, row_index)
}

/// Matching key for labels, names and unit names: lowercased with every
/// non-alphanumeric character stripped, so "Dr. Siti  AMINAH" and
/// "dr siti aminah" collide.
pub fn match_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

pub const NAME_FIELDS: &[&str] = &["name", "fullname", "staffname", "employeename", "nama"];

pub const EXTERNAL_ID_FIELDS: &[&str] = &[
    "externalid",
    "certificateno",
    "certificatenumber",
    "employeeno",
    "employeenumber",
    "registrationno",
    "registrationnumber",
    "staffno",
];

pub const UNIT_FIELDS: &[&str] = &[
    "unit",
    "unitname",
    "school",
    "schoolname",
    "orgunit",
    "organizationalunit",
    "workplace",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrKind {
    Text,
    Date,
    Flag,
}

/// Canonical optional attributes with their alias lists (alias spellings are
/// pre-normalized through `match_key`).
pub const ATTRIBUTE_FIELDS: &[(&str, AttrKind, &[&str])] = &[
    (
        "education",
        AttrKind::Text,
        &[
            "education",
            "educationlevel",
            "lasteducation",
            "qualification",
            "degree",
        ],
    ),
    (
        "position",
        AttrKind::Text,
        &["position", "jobtitle", "title", "role"],
    ),
    (
        "startDate",
        AttrKind::Date,
        &[
            "startdate",
            "hiredate",
            "employmentdate",
            "dateofemployment",
            "joined",
            "joindate",
        ],
    ),
    (
        "birthDate",
        AttrKind::Date,
        &["birthdate", "dateofbirth", "dob", "born"],
    ),
    (
        "certified",
        AttrKind::Flag,
        &["certified", "certification", "certificate", "cert", "iscertified"],
    ),
    (
        "trainingDone",
        AttrKind::Flag,
        &[
            "trainingdone",
            "trainingcompleted",
            "training",
            "induction",
            "inductiondone",
        ],
    ),
];

/// A parsed source row. The only type allowed to interpret loose cell values;
/// everything downstream works with typed drafts.
pub struct FieldBag {
    fields: HashMap<String, Value>,
}

impl FieldBag {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let mut fields = HashMap::new();
        for (label, value) in row {
            let key = match_key(label);
            if key.is_empty() {
                continue;
            }
            // First spelling of a label wins; later duplicates are noise.
            fields.entry(key).or_insert_with(|| value.clone());
        }
        FieldBag { fields }
    }

    fn first_match(&self, aliases: &[&str]) -> Option<String> {
        for alias in aliases {
            if let Some(v) = self.fields.get(*alias) {
                if let Some(text) = value_text(v) {
                    return Some(text);
                }
            }
        }
        None
    }

    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.first_match(aliases)
    }

    /// None = column absent or blank; Some(false) = present but not an
    /// affirmative token (an explicit clear).
    pub fn flag(&self, aliases: &[&str]) -> Option<bool> {
        self.first_match(aliases).map(|t| is_affirmative(&t))
    }

    pub fn date(&self, aliases: &[&str]) -> Option<String> {
        self.first_match(aliases).map(|t| normalize_date_text(&t))
    }
}

/// Coerce a loose JSON cell into trimmed text. Blank strings, nulls and
/// structured values yield None (treated as an absent cell).
fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        _ => None,
    }
}

fn is_affirmative(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "v" | "√" | "x" | "ok" | "done" | "ya" | "sudah"
    )
}

/// Month spellings seen in source exports (English plus Indonesian variants).
const MONTH_NAMES: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("januari", 1),
    ("february", 2),
    ("feb", 2),
    ("februari", 2),
    ("peb", 2),
    ("pebruari", 2),
    ("march", 3),
    ("mar", 3),
    ("maret", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("mei", 5),
    ("june", 6),
    ("jun", 6),
    ("juni", 6),
    ("july", 7),
    ("jul", 7),
    ("juli", 7),
    ("august", 8),
    ("aug", 8),
    ("agu", 8),
    ("agustus", 8),
    ("september", 9),
    ("sep", 9),
    ("sept", 9),
    ("october", 10),
    ("oct", 10),
    ("okt", 10),
    ("oktober", 10),
    ("november", 11),
    ("nov", 11),
    ("nopember", 11),
    ("december", 12),
    ("dec", 12),
    ("des", 12),
    ("desember", 12),
];

fn month_number(name: &str) -> Option<u32> {
    let key = name.trim().to_lowercase();
    MONTH_NAMES
        .iter()
        .find(|(n, _)| *n == key)
        .map(|(_, m)| *m)
}

fn from_serial(n: i64) -> Option<NaiveDate> {
    if !(SERIAL_MIN..=SERIAL_MAX).contains(&n) {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_days(Days::new(n as u64))
}

/// Best-effort date normalization. Recognized spellings come back as
/// `YYYY-MM-DD`; anything else is kept as the original trimmed text rather
/// than dropped, since a wrong-but-present date is more useful downstream
/// than a silent hole.
pub fn normalize_date_text(raw: &str) -> String {
    let t = raw.trim();
    if t.is_empty() {
        return String::new();
    }

    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }

    if t.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = t.parse::<i64>() {
            if let Some(d) = from_serial(n) {
                return d.format("%Y-%m-%d").to_string();
            }
        }
    }

    // "17 Agustus 1985" and friends.
    let parts: Vec<&str> = t.split_whitespace().collect();
    if parts.len() == 3 {
        let day = parts[0].parse::<u32>().ok();
        let month = month_number(parts[1]);
        let year = parts[2].parse::<i32>().ok();
        if let (Some(day), Some(month), Some(year)) = (day, month, year) {
            if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
                return d.format("%Y-%m-%d").to_string();
            }
        }
    }

    t.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Flag(bool),
}

impl AttrValue {
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::Flag(b) => Value::Bool(*b),
        }
    }
}

/// Typed output of normalization, ready for identity resolution.
#[derive(Debug, Clone)]
pub struct StaffDraft {
    pub external_id: String,
    pub name: String,
    pub declared_unit: Option<String>,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Normalize one source row. `Err` carries the skip reason (never a hard
/// failure); a missing external id is repaired with a placeholder instead.
pub fn normalize_row(
    bag: &FieldBag,
    batch_millis: i64,
    row_index: usize,
) -> Result<StaffDraft, String> {
    let Some(name) = bag.text(NAME_FIELDS) else {
        return Err("missing name".to_string());
    };

    let external_id = bag
        .text(EXTERNAL_ID_FIELDS)
        .unwrap_or_else(|| placeholder_id(batch_millis, row_index));

    let declared_unit = bag.text(UNIT_FIELDS);

    let mut attributes = BTreeMap::new();
    for (attr, kind, aliases) in ATTRIBUTE_FIELDS {
        match kind {
            AttrKind::Text => {
                if let Some(text) = bag.text(aliases) {
                    attributes.insert(attr.to_string(), AttrValue::Text(text));
                }
            }
            AttrKind::Date => {
                if let Some(date) = bag.date(aliases) {
                    if !date.is_empty() {
                        attributes.insert(attr.to_string(), AttrValue::Text(date));
                    }
                }
            }
            AttrKind::Flag => {
                if let Some(flag) = bag.flag(aliases) {
                    attributes.insert(attr.to_string(), AttrValue::Flag(flag));
                }
            }
        }
    }

    Ok(StaffDraft {
        external_id,
        name,
        declared_unit,
        attributes,
    })
}
