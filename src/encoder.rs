//! One-hot encoding of a [`Selection`] into the model's input vector.
//!
//! Layout: `[emotion (25) | event (25) | genre (51)]`. A `None` axis yields an
//! all-zero segment.

use crate::error::{RecommendError, Result};
use crate::selection::{Emotion, Event, Genre, Selection};

pub const EMOTION_OFFSET: usize = 0;
pub const EVENT_OFFSET: usize = EMOTION_OFFSET + Emotion::active_cardinality();
pub const GENRE_OFFSET: usize = EVENT_OFFSET + Event::active_cardinality();

/// Total width of an encoded selection.
pub const ENCODED_WIDTH: usize = GENRE_OFFSET + Genre::active_cardinality();

/// Model input: three concatenated one-hot segments.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVector(Vec<f64>);

impl EncodedVector {
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A vector with a single `1` at `position` in the combined layout.
    ///
    /// Used by the training synthesizer, where position `i` maps to CSV row `i`.
    pub fn one_hot(position: usize) -> Result<Self> {
        if position >= ENCODED_WIDTH {
            return Err(RecommendError::InvalidSelection(format!(
                "position {position} outside encoded width {ENCODED_WIDTH}"
            )));
        }
        let mut values = vec![0.0; ENCODED_WIDTH];
        values[position] = 1.0;
        Ok(Self(values))
    }
}

impl AsRef<[f64]> for EncodedVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

fn set_segment(values: &mut [f64], offset: usize, ordinal: Option<usize>) {
    if let Some(index) = ordinal {
        values[offset + index] = 1.0;
    }
}

/// Encode a selection. Infallible: every member is in range by construction.
#[must_use]
pub fn encode(selection: &Selection) -> EncodedVector {
    let mut values = vec![0.0; ENCODED_WIDTH];
    set_segment(&mut values, EMOTION_OFFSET, selection.emotion.map(Emotion::ordinal));
    set_segment(&mut values, EVENT_OFFSET, selection.event.map(Event::ordinal));
    set_segment(&mut values, GENRE_OFFSET, selection.genre.map(Genre::ordinal));
    EncodedVector(values)
}

/// Encode raw ordinals as they arrive from a UI or the command line.
///
/// Any ordinal outside its axis is rejected with `InvalidSelection` rather
/// than clamped.
pub fn encode_indices(
    emotion: Option<usize>,
    event: Option<usize>,
    genre: Option<usize>,
) -> Result<EncodedVector> {
    Ok(encode(&selection_from_indices(emotion, event, genre)?))
}

pub fn selection_from_indices(
    emotion: Option<usize>,
    event: Option<usize>,
    genre: Option<usize>,
) -> Result<Selection> {
    fn lookup<T>(
        index: Option<usize>,
        from_ordinal: fn(usize) -> Option<T>,
        label: &str,
        cardinality: usize,
    ) -> Result<Option<T>> {
        index
            .map(|i| {
                from_ordinal(i).ok_or_else(|| {
                    RecommendError::InvalidSelection(format!(
                        "{label} index {i} out of range 0..{cardinality}"
                    ))
                })
            })
            .transpose()
    }

    Ok(Selection {
        emotion: lookup(emotion, Emotion::from_ordinal, "emotion", Emotion::active_cardinality())?,
        event: lookup(event, Event::from_ordinal, "event", Event::active_cardinality())?,
        genre: lookup(genre, Genre::from_ordinal, "genre", Genre::active_cardinality())?,
    })
}

/// Recover the selection from an encoded vector.
///
/// Fails when the width is wrong or a segment has more than one hot bit.
pub fn decode(vector: &[f64]) -> Result<Selection> {
    if vector.len() != ENCODED_WIDTH {
        return Err(RecommendError::InvalidSelection(format!(
            "expected width {ENCODED_WIDTH}, got {}",
            vector.len()
        )));
    }

    let hot = |segment: &[f64], label: &str| -> Result<Option<usize>> {
        let mut positions = segment
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == 1.0)
            .map(|(i, _)| i);
        let first = positions.next();
        if positions.next().is_some() {
            return Err(RecommendError::InvalidSelection(format!(
                "{label} segment has more than one hot bit"
            )));
        }
        Ok(first)
    };

    selection_from_indices(
        hot(&vector[EMOTION_OFFSET..EVENT_OFFSET], "emotion")?,
        hot(&vector[EVENT_OFFSET..GENRE_OFFSET], "event")?,
        hot(&vector[GENRE_OFFSET..], "genre")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_is_sum_of_cardinalities() {
        assert_eq!(ENCODED_WIDTH, 101);
        assert_eq!(EVENT_OFFSET, 25);
        assert_eq!(GENRE_OFFSET, 50);
    }

    #[test]
    fn test_none_selection_is_all_zero() {
        let encoded = encode(&Selection::default());
        assert_eq!(encoded.len(), ENCODED_WIDTH);
        assert!(encoded.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_happy_vacation_no_genre() {
        let selection = Selection::new(Some(Emotion::Happy), Some(Event::Vacation), None);
        let encoded = encode(&selection);
        let values = encoded.as_slice();

        assert_eq!(values.len(), 101);
        assert_eq!(values[0], 1.0);
        assert_eq!(values[EVENT_OFFSET], 1.0);
        assert_eq!(values.iter().filter(|v| **v == 1.0).count(), 2);
        assert_eq!(values[GENRE_OFFSET..].len(), 51);
        assert!(values[GENRE_OFFSET..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_round_trip_every_triple() {
        for emotion in Emotion::ALL {
            for event in Event::ALL {
                for genre in Genre::ALL {
                    let selection = Selection::new(Some(*emotion), Some(*event), Some(*genre));
                    let decoded = decode(encode(&selection).as_slice()).unwrap();
                    assert_eq!(decoded, selection);
                }
            }
        }
    }

    #[test]
    fn test_encode_indices_rejects_out_of_range() {
        assert!(encode_indices(Some(24), Some(24), Some(50)).is_ok());
        let err = encode_indices(Some(25), None, None).unwrap_err();
        assert!(matches!(err, RecommendError::InvalidSelection(_)));
        assert!(encode_indices(None, None, Some(51)).is_err());
    }

    #[test]
    fn test_one_hot_positions() {
        let vector = EncodedVector::one_hot(GENRE_OFFSET + 3).unwrap();
        let selection = decode(vector.as_slice()).unwrap();
        assert_eq!(selection.genre, Some(Genre::Jazz));
        assert!(selection.emotion.is_none());
        assert!(EncodedVector::one_hot(ENCODED_WIDTH).is_err());
    }

    #[test]
    fn test_decode_rejects_double_hot_segment() {
        let mut values = vec![0.0; ENCODED_WIDTH];
        values[1] = 1.0;
        values[2] = 1.0;
        assert!(decode(&values).is_err());
        assert!(decode(&values[..100]).is_err());
    }
}
