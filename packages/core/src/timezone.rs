//! Timezone abbreviation lookup.

use chrono_tz::Tz;

/// Common abbreviations mapped to a representative IANA zone.
const ABBREVIATIONS: &[(&str, Tz)] = &[
    ("EST", Tz::America__New_York),
    ("EDT", Tz::America__New_York),
    ("CST", Tz::America__Chicago),
    ("CDT", Tz::America__Chicago),
    ("MST", Tz::America__Denver),
    ("MDT", Tz::America__Denver),
    ("PST", Tz::America__Los_Angeles),
    ("PDT", Tz::America__Los_Angeles),
    ("GMT", Tz::UTC),
    ("UTC", Tz::UTC),
    ("ICT", Tz::Asia__Bangkok),
    ("JST", Tz::Asia__Tokyo),
    ("IST", Tz::Asia__Kolkata),
    ("AEST", Tz::Australia__Sydney),
];

/// Resolve a zone name or abbreviation.
///
/// IANA names (`Europe/Berlin`) are tried first, then the abbreviation table,
/// case-insensitively. Unknown input yields `None`.
pub fn guess_timezone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if let Ok(tz) = name.parse::<Tz>() {
        return Some(tz);
    }

    let upper = name.to_ascii_uppercase();
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == upper)
        .map(|(_, tz)| *tz)
}
