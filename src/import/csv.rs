use ::csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};

use crate::{
    engine::ranking::Leaderboard,
    format::format_duration,
};

use super::ImportResult;

const BOM: char = '\u{feff}';
const EXPORT_DELIMITER: u8 = b';';

/// Header row plus data rows, every field cleaned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Field separator detected on the header line.
    pub delimiter: char,
    /// Cleaned header names.
    pub headers: Vec<String>,
    /// Cleaned data rows; rows may be shorter or longer than the header.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Field `column` of `row`, empty when the row is short.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map_or("", String::as_str)
    }
}

/// `;` when the header line has strictly more semicolons than commas.
pub fn detect_delimiter(header_line: &str) -> char {
    let commas = header_line.matches(',').count();
    let semis = header_line.matches(';').count();
    if semis > commas {
        ';'
    } else {
        ','
    }
}

/// Parses delimited text; blank lines are skipped and a leading BOM ignored.
///
/// The header is the first non-blank record. Ragged rows are accepted.
pub fn parse(text: &str) -> ImportResult<Table> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let delimiter = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .map_or(',', detect_delimiter);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let fields: Vec<String> = record?.iter().map(clean_field).collect();
        if fields.iter().any(|f| !f.is_empty()) {
            records.push(fields);
        }
    }

    let mut records = records.into_iter();
    let headers = records.next().unwrap_or_default();
    Ok(Table {
        delimiter,
        headers,
        rows: records.collect(),
    })
}

/// Trims, strips one layer of matching quotes, and unwraps `="…"`.
///
/// Quoting the reader left in place (a quote after leading blanks) is
/// resolved here, `""` included.
pub fn clean_field(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = match strip_matching_quotes(trimmed) {
        Some(inner) if trimmed.starts_with('"') => inner.replace("\"\"", "\""),
        Some(inner) => inner.to_string(),
        None => trimmed.to_string(),
    };
    match unquoted
        .strip_prefix("=\"")
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.to_string(),
        None => unquoted,
    }
}

fn strip_matching_quotes(s: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|q| {
        s.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

/// Header row of [`export_leaderboard_csv`].
pub const EXPORT_HEADERS: [&str; 11] = [
    "Position",
    "Dossard",
    "Nom",
    "Prénom",
    "Sexe",
    "Catégorie",
    "Club",
    "Dernier Point",
    "Temps",
    "Vitesse (km/h)",
    "Progression (%)",
];

/// Spreadsheet-friendly export: BOM, `;`, every value quoted.
///
/// With `protect_bib` the bib is written as `="007"` so leading zeros survive.
pub fn export_leaderboard_csv(board: &Leaderboard, protect_bib: bool) -> ImportResult<String> {
    let mut buf = String::from(BOM).into_bytes();
    let mut writer = WriterBuilder::new()
        .delimiter(EXPORT_DELIMITER)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(&mut buf);
    writer.write_record(EXPORT_HEADERS)?;

    for (idx, s) in board.standings.iter().enumerate() {
        let bib = if protect_bib {
            format!("=\"{}\"", s.bib)
        } else {
            s.bib.clone()
        };
        let time = match s.net_time {
            Some(ms) if ms > 0 => format_duration(ms),
            _ => "--:--:--.--".to_string(),
        };
        writer.write_record([
            (idx + 1).to_string(),
            bib,
            s.last_name.to_uppercase(),
            s.first_name.clone(),
            s.gender.clone(),
            s.category.clone(),
            s.club.clone().filter(|c| !c.is_empty()).unwrap_or_else(|| "Individuel".to_string()),
            s.checkpoint_name.clone(),
            time,
            format!("{:.2}", s.speed_kmh),
            format!("{}%", s.progress.round() as i64),
        ])?;
    }
    writer.flush().map_err(::csv::Error::from)?;
    drop(writer);

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `Export_Live_<race name with underscores>.csv`.
pub fn export_file_name(race_name: &str) -> String {
    let name: Vec<&str> = race_name.split_whitespace().collect();
    format!("Export_Live_{}.csv", name.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_prefers_strict_semicolon_majority() {
        assert_eq!(detect_delimiter("a,b;c;d"), ';');
        assert_eq!(detect_delimiter("a;b,c"), ',');
        assert_eq!(detect_delimiter("abc"), ',');
    }

    #[test]
    fn fields_are_cleaned() {
        assert_eq!(clean_field("  'Nom' "), "Nom");
        assert_eq!(clean_field("\"=\"\"007\"\"\""), "007");
        assert_eq!(clean_field("=\"42\""), "42");
        assert_eq!(clean_field("\"say \"\"hi\"\"\""), "say \"hi\"");
        assert_eq!(clean_field("O'Neil"), "O'Neil");
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_quotes() {
        let t = parse("Nom;Club\n\"A;B\";\"=\"\"007\"\"\"\n'x'; \"say \"\"hi\"\"\"\n").unwrap();
        assert_eq!(t.rows[0], vec!["A;B".to_string(), "007".to_string()]);
        assert_eq!(t.rows[1], vec!["x".to_string(), "say \"hi\"".to_string()]);
    }

    #[test]
    fn parse_skips_bom_and_blank_lines() {
        let t = parse("\u{feff}Dossard;Nom\r\n\r\n12;DOE\r\n  \r\n").unwrap();
        assert_eq!(t.delimiter, ';');
        assert_eq!(t.headers, vec!["Dossard", "Nom"]);
        assert_eq!(t.rows, vec![vec!["12".to_string(), "DOE".to_string()]]);
        assert_eq!(t.cell(0, 5), "");
    }

    #[test]
    fn ragged_rows_are_kept() {
        let t = parse("a,b,c\n1\n1,2,3,4\n").unwrap();
        assert_eq!(t.rows[0].len(), 1);
        assert_eq!(t.rows[1].len(), 4);
        assert_eq!(t.cell(0, 2), "");
    }

    #[test]
    fn file_name_replaces_whitespace() {
        assert_eq!(export_file_name("Trail  des Crêtes"), "Export_Live_Trail_des_Crêtes.csv");
    }
}
