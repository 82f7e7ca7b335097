use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}; expected one of {{movie_name}}, {{desired_ending}}")]
    UnknownPlaceholder(String),
    #[error("no value supplied for placeholder {{{0}}}")]
    MissingValue(Placeholder),
}

/// The closed set of keys a prompt template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    MovieName,
    DesiredEnding,
}

impl Placeholder {
    pub const ALL: [Placeholder; 2] = [Placeholder::MovieName, Placeholder::DesiredEnding];

    pub fn key(self) -> &'static str {
        match self {
            Placeholder::MovieName => "movie_name",
            Placeholder::DesiredEnding => "desired_ending",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The two user-supplied values substituted into every template of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    pub movie_name: String,
    pub desired_ending: String,
}

impl RunInputs {
    pub fn new(movie_name: impl Into<String>, desired_ending: impl Into<String>) -> Self {
        Self {
            movie_name: movie_name.into(),
            desired_ending: desired_ending.into(),
        }
    }

    pub fn value(&self, placeholder: Placeholder) -> &str {
        match placeholder {
            Placeholder::MovieName => &self.movie_name,
            Placeholder::DesiredEnding => &self.desired_ending,
        }
    }
}

// `{identifier}`; braces around anything else (JSON, prose) stay literal.
static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// A prompt template whose placeholders were checked against the closed key
/// set when it was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    placeholders: Vec<Placeholder>,
}

impl Template {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut placeholders = Vec::new();

        for caps in RE_PLACEHOLDER.captures_iter(&source) {
            let key = &caps[1];
            let placeholder = Placeholder::from_key(key)
                .ok_or_else(|| TemplateError::UnknownPlaceholder(key.to_string()))?;
            if !placeholders.contains(&placeholder) {
                placeholders.push(placeholder);
            }
        }

        Ok(Self { source, placeholders })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    pub fn render(&self, inputs: &RunInputs) -> Result<String, TemplateError> {
        for placeholder in &self.placeholders {
            if inputs.value(*placeholder).trim().is_empty() {
                return Err(TemplateError::MissingValue(*placeholder));
            }
        }

        let rendered = RE_PLACEHOLDER.replace_all(&self.source, |caps: &Captures<'_>| {
            match Placeholder::from_key(&caps[1]) {
                Some(placeholder) => inputs.value(placeholder).trim().to_string(),
                None => caps[0].to_string(),
            }
        });

        Ok(rendered.into_owned())
    }
}

/// True when `text` still contains a recognised `{key}` token.
pub fn has_unresolved_placeholder(text: &str) -> bool {
    RE_PLACEHOLDER
        .captures_iter(text)
        .any(|caps| Placeholder::from_key(&caps[1]).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_keys() {
        let template =
            Template::parse("Plot of {movie_name} ending with: {desired_ending}. Again {movie_name}.")
                .unwrap();
        assert_eq!(
            template.placeholders(),
            &[Placeholder::MovieName, Placeholder::DesiredEnding]
        );

        let rendered = template
            .render(&RunInputs::new("Stree", "she was a ghost"))
            .unwrap();
        assert_eq!(
            rendered,
            "Plot of Stree ending with: she was a ghost. Again Stree."
        );
        assert!(!has_unresolved_placeholder(&rendered));
    }

    #[test]
    fn rejects_unknown_keys_at_parse_time() {
        let err = Template::parse("Hello {movieName}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("movieName".into()));
    }

    #[test]
    fn leaves_non_identifier_braces_alone() {
        let template = Template::parse(r#"Reply as {"action": "respond"} for {movie_name}"#).unwrap();
        let rendered = template.render(&RunInputs::new("Heat", "x")).unwrap();
        assert_eq!(rendered, r#"Reply as {"action": "respond"} for Heat"#);
    }

    #[test]
    fn blank_value_is_missing() {
        let template = Template::parse("Ending: {desired_ending}").unwrap();
        let err = template.render(&RunInputs::new("Heat", "   ")).unwrap_err();
        assert_eq!(err, TemplateError::MissingValue(Placeholder::DesiredEnding));
    }

    #[test]
    fn unused_blank_value_is_fine() {
        let template = Template::parse("Only {movie_name}").unwrap();
        assert_eq!(
            template.render(&RunInputs::new("Heat", "")).unwrap(),
            "Only Heat"
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let template = Template::parse("{movie_name}").unwrap();
        let rendered = template
            .render(&RunInputs::new("{desired_ending}", "twist"))
            .unwrap();
        assert_eq!(rendered, "{desired_ending}");
    }
}
