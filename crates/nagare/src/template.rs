use std::sync::LazyLock;

use regex::{Captures, Regex, Replacer};

// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers. The reason
// is that such a string replacement can be easily implemented without requiring a specific library."
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0([\d])d)?\$").unwrap()
});

/// Values substituted into a media template. Identifiers without a value are
/// left untouched in the output.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub number: Option<i64>,
    pub time: Option<u64>,
}

impl TemplateContext {
    pub fn for_representation(id: Option<&str>, bandwidth: u64) -> Self {
        Self {
            representation_id: id.map(String::from),
            bandwidth: Some(bandwidth),
            number: None,
            time: None,
        }
    }

    pub fn with_number(mut self, number: i64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }
}

/// A URL pattern with `$RepresentationID$`/`$Number$`/`$Time$`/`$Bandwidth$`
/// identifiers, optionally width-formatted (`$Number%05d$`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTemplate {
    pattern: String,
}

impl MediaTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into() }
    }

    pub fn resolve(&self, context: &TemplateContext) -> String {
        TEMPLATE_REGEX
            .replace_all(&self.pattern, ContextReplacer(context))
            .to_string()
    }
}

struct ContextReplacer<'a>(&'a TemplateContext);

impl Replacer for ContextReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let value = match caps.get(1).unwrap().as_str() {
            "RepresentationID" => self.0.representation_id.clone(),
            "Number" => self.0.number.map(|n| n.to_string()),
            "Time" => self.0.time.map(|t| t.to_string()),
            "Bandwidth" => self.0.bandwidth.map(|b| b.to_string()),
            _ => None,
        };
        let Some(value) = value else {
            dst.push_str(caps.get(0).unwrap().as_str());
            return;
        };

        let width = caps.get(2).map(|m| m.as_str().parse().unwrap());
        if let Some(width) = width {
            dst.push_str(&format!("{value:0>width$}", width = width));
        } else {
            dst.push_str(&value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        TemplateContext::for_representation(Some("video-1"), 800_000)
            .with_number(42)
            .with_time(120_000)
    }

    #[test]
    fn test_resolve_identifiers() {
        let ctx = context();
        assert_eq!(
            MediaTemplate::new("$RepresentationID$/$Number$.m4s").resolve(&ctx),
            "video-1/42.m4s"
        );
        assert_eq!(
            MediaTemplate::new("seg-$Time$-$Bandwidth$.m4s").resolve(&ctx),
            "seg-120000-800000.m4s"
        );
    }

    #[test]
    fn test_resolve_with_width() {
        let ctx = context();
        assert_eq!(
            MediaTemplate::new("$Number%05d$.m4s").resolve(&ctx),
            "00042.m4s"
        );
        assert_eq!(
            MediaTemplate::new("$Number%09d$.m4s").resolve(&ctx),
            "000000042.m4s"
        );
    }

    #[test]
    fn test_missing_values_left_untouched() {
        let ctx = TemplateContext::default();
        assert_eq!(
            MediaTemplate::new("$RepresentationID$/$Number$.m4s").resolve(&ctx),
            "$RepresentationID$/$Number$.m4s"
        );
    }

    #[test]
    fn test_unknown_identifier_left_untouched() {
        let ctx = context();
        assert_eq!(
            MediaTemplate::new("$SubNumber$.m4s").resolve(&ctx),
            "$SubNumber$.m4s"
        );
    }
}
