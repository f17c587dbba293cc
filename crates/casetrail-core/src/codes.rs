use std::collections::HashMap;

pub const UNKNOWN_EVENT_DESCRIPTION: &str = "Unknown";

const BUILTIN_EVENT_CODES: &[(&str, &str)] = &[
    ("IAF", "Initial application filed"),
    ("FTA0", "Biometrics appointment scheduled"),
    ("FTA1", "Biometrics appointment rescheduled"),
    ("BFP", "Biometrics taken"),
    ("H008", "Case transferred to another office"),
    ("RFE", "Request for evidence sent"),
    ("RFER", "Response to request for evidence received"),
    ("IAS", "Interview scheduled"),
    ("IAR", "Interview rescheduled"),
    ("IAC", "Interview completed"),
    ("FTL", "Fingerprint fee waived"),
    ("NOID", "Notice of intent to deny sent"),
    ("APR", "Case approved"),
    ("DEN", "Case denied"),
    ("CPO", "Card production ordered"),
    ("CMA", "Card mailed"),
    ("CDL", "Card delivered"),
    ("WDR", "Case withdrawn"),
];

/// Immutable code → description lookup. Keys are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventCodeTable {
    entries: HashMap<String, String>,
}

impl EventCodeTable {
    pub fn builtin() -> Self {
        Self::from_pairs(
            BUILTIN_EVENT_CODES
                .iter()
                .map(|(code, description)| ((*code).to_owned(), (*description).to_owned())),
        )
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let entries = pairs
            .into_iter()
            .filter_map(|(code, description)| {
                let code = normalize_code(&code);
                (!code.is_empty()).then(|| (code, description.trim().to_owned()))
            })
            .collect();
        Self { entries }
    }

    /// Returns a new table where entries from `overrides` replace or extend this one.
    pub fn with_overrides(&self, overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(Self::from_pairs(overrides).entries);
        Self { entries }
    }

    pub fn lookup(&self, code: &str) -> Option<&str> {
        self.entries.get(&normalize_code(code)).map(String::as_str)
    }

    pub fn describe(&self, code: &str) -> &str {
        self.lookup(code).unwrap_or(UNKNOWN_EVENT_DESCRIPTION)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
