//! View models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

/// Row counts of the five settings tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsCounts {
    pub languages: i64,
    pub countries: i64,
    pub newspapers: i64,
    pub pages: i64,
    pub page_groups: i64,
}

impl SettingsCounts {
    /// True iff every table holds at least one row.
    pub fn all_present(&self) -> bool {
        self.languages > 0
            && self.countries > 0
            && self.newspapers > 0
            && self.pages > 0
            && self.page_groups > 0
    }
}
