//! Pitch-name utilities and the fixed G-minor scale the engine plays in.
//!
//! Pitch names are a letter, an optional accidental (`#` or `b`) and an
//! octave number, e.g. "G1", "Bb3", "F#4". Integer pitches are MIDI note
//! numbers (C4 = 60).

/// The engine's scale: G natural minor from G1 to Bb4, ascending.
/// Index order matters: voices select ranges by index.
pub const SCALE: [&str; 24] = [
    "G1", "A1", "Bb1", "C2", "D2", "Eb2", "F2", "G2", "A2", "Bb2", "C3", "D3", "Eb3", "F3", "G3",
    "A3", "Bb3", "C4", "D4", "Eb4", "F4", "G4", "A4", "Bb4",
];

/// Root of the scale; the bass always plays this.
pub const ROOT: &str = SCALE[0];

/// Pitch used when a name can't be parsed (middle C).
pub const SENTINEL_MIDI: i32 = 60;
/// Octaves a name may carry; anything outside is unparseable.
pub const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = -1..=9;

const FLAT_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Parse a pitch name into a MIDI note number. Returns `None` for anything
/// that isn't letter + optional accidental + octave in [`OCTAVE_RANGE`].
pub fn note_to_midi(name: &str) -> Option<i32> {
    let name = name.trim();
    let mut chars = name.chars();
    let letter = chars.next()?;
    let pitch_class = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave_str) = if let Some(r) = rest.strip_prefix('#') {
        (1, r)
    } else if let Some(r) = rest.strip_prefix('b') {
        (-1, r)
    } else {
        (0, rest)
    };

    let digits = octave_str.strip_prefix('-').unwrap_or(octave_str);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let octave: i32 = octave_str.parse().ok()?;
    if !OCTAVE_RANGE.contains(&octave) {
        return None;
    }
    Some((octave + 1) * 12 + pitch_class + accidental)
}

/// Like [`note_to_midi`], but unparseable names degrade to [`SENTINEL_MIDI`].
pub fn parse_pitch(name: &str) -> i32 {
    note_to_midi(name).unwrap_or(SENTINEL_MIDI)
}

/// Spell a MIDI note number with flats, e.g. 70 → "Bb4".
pub fn midi_to_note(midi: i32) -> String {
    let pc = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", FLAT_NAMES[pc], octave)
}

/// Convert MIDI note number (fractional) to Hz. A4 = MIDI 69 = 440 Hz.
pub fn midi_to_hz(midi: f64) -> f64 {
    440.0 * 2.0_f64.powf((midi - 69.0) / 12.0)
}

/// Index of the scale entry closest to `midi` by absolute semitone distance.
/// Ties go to the lower entry (first in ascending order).
pub fn nearest_scale_index(midi: i32) -> usize {
    let mut best = 0;
    let mut best_dist = i32::MAX;
    for (i, name) in SCALE.iter().enumerate() {
        let dist = (parse_pitch(name) - midi).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Quantize a pitch name onto the scale.
pub fn snap_to_scale(name: &str) -> &'static str {
    SCALE[nearest_scale_index(parse_pitch(name))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_to_midi() {
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("G1"), Some(31));
        assert_eq!(note_to_midi("Bb4"), Some(70));
        assert_eq!(note_to_midi("F#3"), Some(54));
        assert_eq!(note_to_midi("b3"), Some(59));
        assert_eq!(note_to_midi("C-1"), Some(0));
    }

    #[test]
    fn test_unparseable_names() {
        for bad in ["", "H2", "C", "Cx4", "C#", "4C", "Bb"] {
            assert_eq!(note_to_midi(bad), None, "{:?} should not parse", bad);
            assert_eq!(parse_pitch(bad), SENTINEL_MIDI);
        }
    }

    #[test]
    fn test_out_of_range_octaves() {
        for bad in ["C999999999", "G10", "Bb-2", "C99999999999999999999", "A-2147483648"] {
            assert_eq!(note_to_midi(bad), None, "{:?} should not parse", bad);
            assert_eq!(parse_pitch(bad), SENTINEL_MIDI);
        }
        assert_eq!(note_to_midi("G9"), Some(127));
        assert_eq!(note_to_midi("B9"), Some(131));
    }

    #[test]
    fn test_midi_to_note() {
        assert_eq!(midi_to_note(60), "C4");
        assert_eq!(midi_to_note(70), "Bb4");
        assert_eq!(midi_to_note(31), "G1");
        assert_eq!(midi_to_note(61), "Db4");
    }

    #[test]
    fn test_midi_to_hz() {
        assert!((midi_to_hz(69.0) - 440.0).abs() < 0.01);
        assert!((midi_to_hz(60.0) - 261.63).abs() < 0.1);
    }

    #[test]
    fn test_scale_is_ascending() {
        let pitches: Vec<i32> = SCALE.iter().map(|n| parse_pitch(n)).collect();
        assert!(pitches.windows(2).all(|w| w[0] < w[1]));
        for name in SCALE {
            assert!(note_to_midi(name).is_some());
        }
    }

    #[test]
    fn test_snap_exact_members() {
        for name in SCALE {
            assert_eq!(snap_to_scale(name), name);
        }
    }

    #[test]
    fn test_snap_nearest() {
        // B3 (59) sits between Bb3 (58) and C4 (60); tie goes to Bb3.
        assert_eq!(snap_to_scale("B3"), "Bb3");
        // E4 (64): Eb4 (63) vs F4 (65), tie → Eb4.
        assert_eq!(snap_to_scale("E4"), "Eb4");
        // F#3 (54): F3 (53) vs G3 (55), tie → F3.
        assert_eq!(snap_to_scale("F#3"), "F3");
        // Out of range clamps to the ends.
        assert_eq!(snap_to_scale("C0"), "G1");
        assert_eq!(snap_to_scale("C8"), "Bb4");
        // Garbage snaps the sentinel (C4).
        assert_eq!(snap_to_scale("???"), "C4");
    }

    #[test]
    fn test_snap_idempotent() {
        for midi in 0..128 {
            let name = midi_to_note(midi);
            let once = snap_to_scale(&name);
            assert!(SCALE.contains(&once));
            assert_eq!(snap_to_scale(once), once);
        }
    }
}
