//! Header auto-mapping.
//!
//! Two passes over the fields in declaration order. The first only accepts a
//! header equal to the field name or one of its synonyms; the second accepts
//! a header containing a synonym. A header feeds one field at most, and
//! single-letter synonyms never take part in the containment pass.
//! Comparison is case-insensitive and ignores accents.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{ImportError, ImportResult};

/// Participant attribute an import column can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportField {
    /// Bib number, kept as text.
    Bib,
    /// Family name, upper-cased on import.
    LastName,
    /// Given name.
    FirstName,
    /// `M` or `F`.
    Gender,
    /// Age category.
    Category,
    /// Club or team.
    Club,
    /// Race name; unknown names create races.
    Race,
}

impl ImportField {
    /// Every field in mapping order.
    pub const ALL: [ImportField; 7] = [
        ImportField::Bib,
        ImportField::LastName,
        ImportField::FirstName,
        ImportField::Gender,
        ImportField::Category,
        ImportField::Club,
        ImportField::Race,
    ];

    /// Fields an import cannot do without.
    pub const REQUIRED: [ImportField; 2] = [ImportField::Bib, ImportField::LastName];

    /// Field name as shown to the operator.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bib => "bib",
            Self::LastName => "lastName",
            Self::FirstName => "firstName",
            Self::Gender => "gender",
            Self::Category => "category",
            Self::Club => "club",
            Self::Race => "race",
        }
    }

    /// Folded header spellings recognized by [`auto_map`].
    pub fn synonyms(self) -> &'static [&'static str] {
        match self {
            Self::Bib => &["dossard", "bib", "num", "n°"],
            Self::LastName => &["nom", "lastname", "name"],
            Self::FirstName => &["prenom", "firstname"],
            Self::Gender => &["sexe", "sex", "genre", "gender", "s"],
            Self::Category => &["categorie", "category", "cat"],
            Self::Club => &["club", "equipe", "team"],
            Self::Race => &["course", "epreuve", "distance", "race"],
        }
    }
}

impl fmt::Display for ImportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field to header-column assignment; unmapped fields are ignored on import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: HashMap<ImportField, usize>,
}

impl ColumnMapping {
    /// Column feeding `field`, if mapped.
    pub fn column(&self, field: ImportField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Operator override; `None` sets the field to ignore.
    pub fn set(&mut self, field: ImportField, column: Option<usize>) {
        match column {
            Some(c) => {
                self.columns.insert(field, c);
            }
            None => {
                self.columns.remove(&field);
            }
        }
    }

    /// True when `field` has a column.
    pub fn is_mapped(&self, field: ImportField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Fails when a required field is left to ignore.
    pub fn validate(&self) -> ImportResult<()> {
        let missing: Vec<ImportField> = ImportField::REQUIRED
            .into_iter()
            .filter(|f| !self.is_mapped(*f))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::Validation { missing })
        }
    }
}

/// Best-effort mapping of `headers`; see the module docs for the rules.
pub fn auto_map<S: AsRef<str>>(headers: &[S]) -> ColumnMapping {
    let folded: Vec<String> = headers.iter().map(|h| fold(h.as_ref())).collect();
    let mut mapping = ColumnMapping::default();
    let mut taken = vec![false; headers.len()];

    for field in ImportField::ALL {
        let name = fold(field.name());
        let hit = folded.iter().enumerate().position(|(idx, h)| {
            !taken[idx] && (*h == name || field.synonyms().iter().any(|s| h == s))
        });
        if let Some(idx) = hit {
            taken[idx] = true;
            mapping.set(field, Some(idx));
        }
    }

    for field in ImportField::ALL {
        if mapping.is_mapped(field) {
            continue;
        }
        let hit = folded.iter().enumerate().position(|(idx, h)| {
            !taken[idx]
                && field
                    .synonyms()
                    .iter()
                    .filter(|s| s.chars().count() > 1)
                    .any(|s| h.contains(s))
        });
        if let Some(idx) = hit {
            taken[idx] = true;
            mapping.set(field, Some(idx));
        }
    }

    mapping
}

/// Lower-cases and strips common Latin accents.
pub fn fold(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' | 'ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' | 'ì' => 'i',
            'ô' | 'ö' | 'ó' | 'ò' | 'õ' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            'ÿ' => 'y',
            other => other,
        })
        .collect()
}
