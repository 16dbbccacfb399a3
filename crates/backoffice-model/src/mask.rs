//! Input masks and canonicalization
//!
//! Masked fields are edited in display form (`123.456.789-00`) and sent in
//! canonical form (`12345678900`). Canonicalization keeps ASCII digits only,
//! so it is idempotent and independent of which mask produced the display.

/// Strip every formatting character, keeping ASCII digits
#[must_use]
pub fn canonicalize(display: &str) -> String {
    display.chars().filter(char::is_ascii_digit).collect()
}

/// A display mask for a digit-only field
pub trait Mask: Send + Sync {
    /// Format raw or partially formatted input for display
    fn format(&self, raw: &str) -> String;

    /// Canonical wire form of a displayed value
    fn canonicalize(&self, display: &str) -> String {
        canonicalize(display)
    }

    /// Whether the value carries exactly a full code's worth of digits
    fn is_complete(&self, display: &str) -> bool;
}

/// Mask driven by one or more literal patterns where `0` marks a digit slot
///
/// With several patterns, the shortest one that fits the digit count wins,
/// so a phone mask can serve both 10 and 11 digit numbers.
#[derive(Debug, Clone, Copy)]
pub struct PatternMask {
    patterns: &'static [&'static str],
}

/// Brazilian taxpayer id (CPF)
pub const CPF_MASK: PatternMask = PatternMask::new(&["000.000.000-00"]);

/// Brazilian phone, landline or mobile
pub const PHONE_MASK: PatternMask = PatternMask::new(&["(00) 0000-0000", "(00) 0 0000-0000"]);

/// Brazilian postal code (CEP)
pub const CEP_MASK: PatternMask = PatternMask::new(&["00.000-000"]);

impl PatternMask {
    /// Create a mask from patterns ordered by increasing slot count
    #[inline]
    #[must_use]
    pub const fn new(patterns: &'static [&'static str]) -> Self {
        Self { patterns }
    }

    /// Digit slots of the widest pattern
    #[must_use]
    pub fn max_digits(&self) -> usize {
        self.patterns.iter().map(|p| slots(p)).max().unwrap_or(0)
    }

    fn pattern_for(&self, digits: usize) -> &'static str {
        self.patterns
            .iter()
            .copied()
            .find(|p| slots(p) >= digits)
            .or_else(|| self.patterns.last().copied())
            .unwrap_or("")
    }
}

impl Mask for PatternMask {
    fn format(&self, raw: &str) -> String {
        let digits = canonicalize(raw);
        let pattern = self.pattern_for(digits.len());
        let mut remaining = digits.chars().take(slots(pattern)).collect::<Vec<_>>();
        remaining.reverse();

        let mut out = String::with_capacity(pattern.len());
        for ch in pattern.chars() {
            if remaining.is_empty() {
                break;
            }
            if ch == '0' {
                if let Some(d) = remaining.pop() {
                    out.push(d);
                }
            } else {
                out.push(ch);
            }
        }
        out
    }

    fn is_complete(&self, display: &str) -> bool {
        let len = canonicalize(display).len();
        self.patterns.iter().any(|p| slots(p) == len)
    }
}

fn slots(pattern: &str) -> usize {
    pattern.chars().filter(|c| *c == '0').count()
}
