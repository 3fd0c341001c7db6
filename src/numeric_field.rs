use std::fmt::Display;

use log::debug;
use nom::character::complete::multispace0;
use nom::sequence::preceded;
use nom::IResult;

/// A value an editable numeric field can hold.
pub trait FieldValue: Copy + PartialOrd + Display {
    /// Parses the leading number of `text`, ignoring leading whitespace and
    /// anything after the number ("12abc" is 12, "abc" is nothing).
    fn parse_leading(text: &str) -> Option<Self>;
}

impl FieldValue for f32 {
    fn parse_leading(text: &str) -> Option<Self> {
        let parsed: IResult<&str, f32> =
            preceded(multispace0, nom::number::complete::float)(text);
        match parsed {
            Ok((_, value)) if value.is_finite() => Some(value),
            _ => None,
        }
    }
}

impl FieldValue for i32 {
    fn parse_leading(text: &str) -> Option<Self> {
        let parsed: IResult<&str, i32> =
            preceded(multispace0, nom::character::complete::i32)(text);
        parsed.ok().map(|(_, value)| value)
    }
}

/// Text-backed numeric input with a fallback and clamping.
///
/// Committing text that does not start with a number leaves the stored value
/// alone and resets the text to the field's fallback. Anything that parses is
/// clamped to `[min, max]`, stored, and echoed back as the text.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericField<T: FieldValue> {
    text: String,
    value: T,
    fallback: T,
    min: T,
    max: T,
}

impl<T: FieldValue> NumericField<T> {
    pub fn new(initial: T, fallback: T, min: T, max: T) -> Self {
        Self {
            text: initial.to_string(),
            value: initial,
            fallback,
            min,
            max,
        }
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Edit buffer for a text widget. Call [`commit`](Self::commit) when the
    /// edit is finished.
    pub fn text_mut(&mut self) -> &mut String {
        &mut self.text
    }

    /// Parses `text`. Returns the clamped value on success and `None` when
    /// nothing changed.
    pub fn commit(&mut self, text: &str) -> Option<T> {
        match T::parse_leading(text) {
            Some(parsed) => {
                let clamped = clamp(parsed, self.min, self.max);
                self.value = clamped;
                self.text = clamped.to_string();
                Some(clamped)
            }
            None => {
                debug!("Could not parse {:?}; reverting to {}", text, self.fallback);
                self.text = self.fallback.to_string();
                None
            }
        }
    }

    /// Discards an uncommitted edit.
    pub fn revert_text(&mut self) {
        self.text = self.value.to_string();
    }

    /// Sets the value programmatically, clamped, without parsing.
    pub fn set_value(&mut self, value: T) -> T {
        let clamped = clamp(value, self.min, self.max);
        self.value = clamped;
        self.text = clamped.to_string();
        clamped
    }
}

fn clamp<T: PartialOrd>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
