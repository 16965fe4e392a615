//! # Categorical Selection
//!
//! The three closed vocabularies a user picks from: [`Emotion`], [`Event`] and
//! [`Genre`]. "No preference" is `None` in an `Option`, never a member of the
//! enum, so the width of each one-hot segment is simply the member count
//! returned by `active_cardinality()`.
//!
//! ## Versioning
//!
//! The member lists and their order define the encoded-vector layout. Adding,
//! removing or reordering a member changes the model's input contract, so
//! [`ENCODING_VERSION`] must be bumped with it. Persisted models carrying a
//! different version are rejected at load time and rebuilt.

use crate::error::RecommendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the member lists below. Stored inside every model artifact.
pub const ENCODING_VERSION: u32 = 1;

/// Lowercase, strips spaces, dashes and underscores: "Drum and Bass" == "drumandbass".
pub(crate) fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every member, in ordinal order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Number of addressable one-hot positions for this axis.
            #[must_use]
            pub const fn active_cardinality() -> usize {
                Self::ALL.len()
            }

            /// Position of this member inside its one-hot segment.
            #[must_use]
            pub const fn ordinal(self) -> usize {
                self as usize
            }

            #[must_use]
            pub fn from_ordinal(index: usize) -> Option<Self> {
                Self::ALL.get(index).copied()
            }

            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = RecommendError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = canonical(s);
                Self::ALL
                    .iter()
                    .copied()
                    .find(|member| canonical(member.name()) == wanted)
                    .ok_or_else(|| {
                        RecommendError::InvalidSelection(format!("unknown {} `{s}`", $label))
                    })
            }
        }
    };
}

closed_enum! {
    /// How the listener feels.
    Emotion, "emotion" {
        Happy, Sad, Angry, Calm, Excited, Love, Fear, Hopeful, Lonely, Joy,
        Anxiety, Peaceful, Confident, Tense, Nostalgic, Curious, Frustrated,
        Relaxed, Bored, Surprised, Embarrassed, Grateful, Guilty, Proud, Scared,
    }
}

closed_enum! {
    /// What the listener is doing.
    Event, "event" {
        Vacation, Roadtrip, Work, Study, Party, Relaxation, Exercise, Morning,
        Evening, Sleep, Driving, Walking, Running, Cooking, Cleaning, Shopping,
        Hiking, Date, Celebration, Meditation, Workout, Reading, BeachDay,
        Camping, FamilyTime,
    }
}

closed_enum! {
    /// Preferred musical genre.
    Genre, "genre" {
        Pop, Rock, HipHop, Jazz, Classical, Country, Electronic, RnB, Reggae,
        Blues, Metal, Folk, Indie, Punk, Soul, Funk, Disco, House, Techno, Trap,
        Dubstep, Grunge, Ambient, DrumAndBass, EDM, Latin, Gospel, KPop,
        Afrobeat, Dancehall, Ska, Bluegrass, Synthwave, Trance, Garage, Opera,
        Acoustic, Emo, Shoegaze, Hardcore, Industrial, Experimental, Chillout,
        NewWave, LoFi, PostRock, ProgressiveRock, PsychedelicRock, Soundtrack,
        WorldMusic, Alternative,
    }
}

/// A user's choice on all three axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub emotion: Option<Emotion>,
    pub event: Option<Event>,
    pub genre: Option<Genre>,
}

impl Selection {
    #[must_use]
    pub const fn new(emotion: Option<Emotion>, event: Option<Event>, genre: Option<Genre>) -> Self {
        Self { emotion, event, genre }
    }

    /// True when no axis carries a preference.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.emotion.is_none() && self.event.is_none() && self.genre.is_none()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn axis<T: fmt::Display>(value: Option<T>) -> String {
            value.map_or_else(|| "None".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "{} / {} / {}",
            axis(self.emotion),
            axis(self.event),
            axis(self.genre)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinalities() {
        assert_eq!(Emotion::active_cardinality(), 25);
        assert_eq!(Event::active_cardinality(), 25);
        assert_eq!(Genre::active_cardinality(), 51);
    }

    #[test]
    fn test_ordinals_follow_declaration_order() {
        assert_eq!(Emotion::Happy.ordinal(), 0);
        assert_eq!(Emotion::Scared.ordinal(), 24);
        assert_eq!(Event::Relaxation.ordinal(), 5);
        assert_eq!(Genre::Alternative.ordinal(), 50);

        for (index, genre) in Genre::ALL.iter().enumerate() {
            assert_eq!(genre.ordinal(), index);
            assert_eq!(Genre::from_ordinal(index), Some(*genre));
        }
        assert_eq!(Genre::from_ordinal(51), None);
    }

    #[test]
    fn test_parse_is_forgiving_about_case_and_separators() {
        assert_eq!("happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!("beach-day".parse::<Event>().unwrap(), Event::BeachDay);
        assert_eq!("Drum and Bass".parse::<Genre>().unwrap(), Genre::DrumAndBass);
        assert_eq!("lo_fi".parse::<Genre>().unwrap(), Genre::LoFi);
    }

    #[test]
    fn test_parse_rejects_unknown_members() {
        let err = "polka".parse::<Genre>().unwrap_err();
        assert!(matches!(err, RecommendError::InvalidSelection(_)));
        assert!(err.to_string().contains("polka"));
    }

    #[test]
    fn test_selection_display() {
        let selection = Selection::new(Some(Emotion::Calm), None, Some(Genre::Jazz));
        assert_eq!(selection.to_string(), "Calm / None / Jazz");
        assert!(Selection::default().is_empty());
        assert!(!selection.is_empty());
    }
}
