//! Gherkin feature file parsing.
//!
//! Only the structure the catalog records is extracted: the feature name, the
//! feature's tags and one block per scenario. Steps are kept as text inside
//! each scenario block; nothing here validates them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::ScenarioRecord;

/// Language-dependent Gherkin keywords, without the trailing colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GherkinKeywords {
    pub feature: &'static [&'static str],
    pub scenario: &'static [&'static str],
    pub scenario_outline: &'static [&'static str],
}

impl GherkinKeywords {
    pub const ENGLISH: GherkinKeywords = GherkinKeywords {
        feature: &["Feature", "Business Need", "Ability"],
        scenario: &["Scenario", "Example"],
        scenario_outline: &["Scenario Outline", "Scenario Template"],
    };

    pub const RUSSIAN: GherkinKeywords = GherkinKeywords {
        feature: &["Функция", "Функциональность", "Функционал", "Свойство", "Фича"],
        scenario: &["Сценарий", "Пример"],
        scenario_outline: &["Структура сценария", "Шаблон сценария"],
    };

    pub fn for_language(language: Language) -> GherkinKeywords {
        match language {
            Language::En => Self::ENGLISH,
            Language::Ru => Self::RUSSIAN,
        }
    }

    fn header<'a>(keywords: &[&str], line: &'a str) -> Option<&'a str> {
        keywords.iter().find_map(|kw| {
            line.strip_prefix(kw)
                .and_then(|rest| rest.trim_start().strip_prefix(':'))
                .map(str::trim)
        })
    }

    fn feature_header<'a>(&self, line: &'a str) -> Option<&'a str> {
        Self::header(self.feature, line)
    }

    fn scenario_header<'a>(&self, line: &'a str) -> Option<&'a str> {
        // Outline first: "Scenario Outline" also starts with "Scenario".
        Self::header(self.scenario_outline, line).or_else(|| Self::header(self.scenario, line))
    }
}

impl Default for GherkinKeywords {
    fn default() -> Self {
        Self::ENGLISH
    }
}

/// Feature file language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::En => f.write_str("en"),
            Language::Ru => f.write_str("ru"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported feature language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "ru" | "russian" => Ok(Language::Ru),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

/// Errors that can occur when parsing a feature file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no feature header found")]
    MissingFeature,

    #[error("line {line}: scenario before the feature header")]
    ScenarioBeforeFeature { line: usize },

    #[error("line {line}: second feature header")]
    DuplicateFeature { line: usize },
}

/// The catalog-relevant structure of one feature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeature {
    pub name: String,
    pub tags: Vec<String>,
    pub scenarios: Vec<ScenarioRecord>,
}

fn parse_tags(line: &str) -> Vec<String> {
    line.split_whitespace()
        .take_while(|word| !word.starts_with('#'))
        .filter_map(|word| word.strip_prefix('@'))
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

struct OpenScenario {
    name: String,
    tags: Vec<String>,
    lines: Vec<String>,
}

impl OpenScenario {
    fn close(mut self) -> ScenarioRecord {
        while self.lines.last().is_some_and(|l| l.trim().is_empty()) {
            self.lines.pop();
        }
        ScenarioRecord {
            name: self.name,
            tags: self.tags,
            text: self.lines.join("\n"),
        }
    }
}

/// Parses `content` with the given keywords.
///
/// Tag lines directly above the feature header are the feature's tags; tag
/// lines directly above a scenario header are that scenario's. A scenario block
/// runs from its header to the line before the next scenario (or its tags),
/// with trailing blank lines dropped.
pub fn parse_feature(content: &str, keywords: &GherkinKeywords) -> Result<ParsedFeature, ParseError> {
    let mut name: Option<String> = None;
    let mut feature_tags = Vec::new();
    let mut scenarios = Vec::new();
    let mut current: Option<OpenScenario> = None;

    // Tag lines not yet attributed, with their raw text.
    let mut pending_tags: Vec<String> = Vec::new();
    let mut pending_lines: Vec<String> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.starts_with('@') {
            pending_tags.extend(parse_tags(line));
            pending_lines.push(raw.trim_end().to_string());
            continue;
        }

        if let Some(feature_name) = keywords.feature_header(line) {
            if name.is_some() {
                return Err(ParseError::DuplicateFeature { line: line_no });
            }
            name = Some(feature_name.to_string());
            feature_tags = std::mem::take(&mut pending_tags);
            pending_lines.clear();
            continue;
        }

        if let Some(scenario_name) = keywords.scenario_header(line) {
            if name.is_none() {
                return Err(ParseError::ScenarioBeforeFeature { line: line_no });
            }
            if let Some(done) = current.take() {
                scenarios.push(done.close());
            }
            current = Some(OpenScenario {
                name: scenario_name.to_string(),
                tags: std::mem::take(&mut pending_tags),
                lines: vec![raw.trim_end().to_string()],
            });
            pending_lines.clear();
            continue;
        }

        // Tags above something that is not a header (e.g. `Examples:`) stay
        // part of the scenario text.
        if let Some(open) = current.as_mut() {
            open.lines.append(&mut pending_lines);
            open.lines.push(raw.trim_end().to_string());
        } else {
            pending_lines.clear();
        }
        pending_tags.clear();
    }

    if let Some(done) = current.take() {
        scenarios.push(done.close());
    }

    Ok(ParsedFeature {
        name: name.ok_or(ParseError::MissingFeature)?,
        tags: feature_tags,
        scenarios,
    })
}
