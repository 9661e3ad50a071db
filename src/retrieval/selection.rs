//! Best-answer selection across candidates

use crate::reader::AnswerSpan;

/// Answer returned when no candidate produced a usable span
pub const NO_ANSWER: &str = "No answer found.";

/// Reserved classifier/separator tokens that surface when decoding goes wrong
const PLACEHOLDERS: &[&str] = &["[cls]", "[sep]"];

/// Decimal places kept in the reported confidence
const CONFIDENCE_DECIMALS: i32 = 2;

/// Whether decoded text is a reserved token rather than an answer
pub fn is_placeholder(text: &str) -> bool {
    PLACEHOLDERS
        .iter()
        .any(|placeholder| text.eq_ignore_ascii_case(placeholder))
}

/// Pick the span with the highest confidence.
///
/// Empty spans, placeholder spans and spans with a non-finite confidence are
/// discarded first. On equal confidence the earliest span wins, so callers
/// pass spans in candidate (similarity) order.
pub fn select_best<I>(spans: I) -> Option<AnswerSpan>
where
    I: IntoIterator<Item = AnswerSpan>,
{
    let mut best: Option<AnswerSpan> = None;

    for span in spans {
        if span.text.is_empty() || is_placeholder(&span.text) || !span.confidence.is_finite() {
            continue;
        }
        match &best {
            Some(current) if span.confidence <= current.confidence => {}
            _ => best = Some(span),
        }
    }

    best
}

/// Round a raw logit sum to two decimal places, halves to even
pub fn round_confidence(confidence: f32) -> f64 {
    let scale = 10f64.powi(CONFIDENCE_DECIMALS);
    (f64::from(confidence) * scale).round_ties_even() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, confidence: f32) -> AnswerSpan {
        AnswerSpan {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_selects_highest_confidence() {
        let best = select_best(vec![span("Berlin", 3.5), span("Paris", 9.25), span("Rome", 1.0)]);
        assert_eq!(best.unwrap().text, "Paris");
    }

    #[test]
    fn test_ties_go_to_earliest() {
        let best = select_best(vec![span("first", 4.0), span("second", 4.0), span("third", 2.0)]);
        assert_eq!(best.unwrap().text, "first");
    }

    #[test]
    fn test_filters_degenerate_spans() {
        let best = select_best(vec![
            span("", 50.0),
            span("[CLS]", 40.0),
            span("[sep]", 30.0),
            span("nan", f32::NAN),
            span("inf", f32::INFINITY),
            span("Paris", -3.0),
        ]);
        assert_eq!(best.unwrap().text, "Paris");
    }

    #[test]
    fn test_nothing_survives() {
        assert!(select_best(vec![span("", 1.0), span("[SEP]", 2.0)]).is_none());
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn test_placeholder_matching() {
        assert!(is_placeholder("[CLS]"));
        assert!(is_placeholder("[Sep]"));
        assert!(!is_placeholder("[CLS] Paris"));
        assert!(!is_placeholder("cls"));
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(12.3456), 12.35);
        assert_eq!(round_confidence(-7.891), -7.89);
        assert_eq!(round_confidence(0.0), 0.0);
        assert_eq!(round_confidence(5.0), 5.0);
    }

    #[test]
    fn test_round_confidence_halves_to_even() {
        assert_eq!(round_confidence(0.125), 0.12);
        assert_eq!(round_confidence(0.375), 0.38);
        assert_eq!(round_confidence(-2.625), -2.62);
    }
}
