use crate::error::IngestError;
use regex::{Captures, Regex};
use std::collections::HashMap;

pub const ABBREVIATIONS: [(&str, &str); 14] = [
    ("KP", "Khyber Pakhtunkhwa"),
    ("Govt", "Government"),
    ("Dept", "Department"),
    ("Admin", "Administration"),
    ("Sec", "Section"),
    ("Art", "Article"),
    ("Para", "Paragraph"),
    ("Ch", "Chapter"),
    ("Sched", "Schedule"),
    ("Sub-sec", "Sub-section"),
    ("Min", "Minister Ministry"),
    ("DC", "Deputy Commissioner"),
    ("AC", "Assistant Commissioner"),
    ("Tehsil", "Tehsil Administrative"),
];

/// Appends expansions after domain abbreviations found in a query.
///
/// Matching is whole-word and case-insensitive, done in a single pass over
/// the original query so expansions are never expanded again. The matched
/// text is kept as typed.
#[derive(Debug, Clone)]
pub struct QueryPreprocessor {
    pattern: Regex,
    expansions: HashMap<String, String>,
}

impl QueryPreprocessor {
    pub fn new() -> Result<Self, IngestError> {
        Self::with_abbreviations(&ABBREVIATIONS)
    }

    pub fn with_abbreviations(table: &[(&str, &str)]) -> Result<Self, IngestError> {
        let mut ordered: Vec<&str> = table.iter().map(|(abbreviation, _)| *abbreviation).collect();
        // longest first so "Sub-sec" wins over "Sec"
        ordered.sort_by(|left, right| right.len().cmp(&left.len()).then(left.cmp(right)));

        let alternation = ordered
            .iter()
            .map(|abbreviation| regex::escape(abbreviation))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?;

        let expansions = table
            .iter()
            .map(|(abbreviation, expansion)| (abbreviation.to_lowercase(), expansion.to_string()))
            .collect();

        Ok(Self {
            pattern,
            expansions,
        })
    }

    pub fn expand(&self, query: &str) -> String {
        self.pattern
            .replace_all(query, |captures: &Captures| {
                let matched = &captures[0];
                match self.expansions.get(&matched.to_lowercase()) {
                    Some(expansion) => format!("{matched} {expansion}"),
                    None => matched.to_string(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocessor() -> QueryPreprocessor {
        QueryPreprocessor::new().expect("abbreviation pattern compiles")
    }

    #[test]
    fn abbreviation_is_kept_and_expansion_appended() {
        assert_eq!(
            preprocessor().expand("Sec 3 of the constitution"),
            "Sec Section 3 of the constitution"
        );
    }

    #[test]
    fn multiple_abbreviations_expand_independently() {
        assert_eq!(
            preprocessor().expand("KP Govt Dept of health"),
            "KP Khyber Pakhtunkhwa Govt Government Dept Department of health"
        );
    }

    #[test]
    fn matching_is_whole_word_and_case_insensitive() {
        let processor = preprocessor();
        assert_eq!(processor.expand("duties of the dc"), "duties of the dc Deputy Commissioner");
        assert_eq!(processor.expand("Secretary and Chapters"), "Secretary and Chapters");
        assert_eq!(processor.expand("article on art"), "article on art Article");
    }

    #[test]
    fn longer_abbreviation_wins() {
        assert_eq!(
            preprocessor().expand("Sub-sec 2"),
            "Sub-sec Sub-section 2"
        );
    }

    #[test]
    fn query_without_abbreviations_is_unchanged() {
        let query = "how to apply for a domicile certificate";
        assert_eq!(preprocessor().expand(query), query);
    }
}
