//! Spinner glyph classification.

use unicode_general_category::{GeneralCategory, get_general_category};

/// Glyphs Claude Code cycles through in its status line.
pub const FAST_PATH_SPINNERS: &[char] = &['·', '✻', '✽', '✶', '✳', '✢'];

/// Characters that appear at line starts in chrome or prose but never spin.
const NON_SPINNER_CHARS: &[char] = &[
    '─', '│', '┌', '┐', '└', '┘', '├', '┤', '┬', '┴', '┼', '═', '║', '╔', '╗', '╚', '╝', '╠',
    '╣', '╦', '╩', '╬', '>', '|', '+', '<', '=', '~',
];

const BOX_DRAWING: std::ops::RangeInclusive<char> = '\u{2500}'..='\u{257F}';
const BRAILLE: std::ops::RangeInclusive<char> = '\u{2800}'..='\u{28FF}';

/// Whether `ch` is plausibly an activity spinner.
///
/// Unknown glyphs are accepted when they are Unicode symbols (`So`/`Sm`), so a
/// spinner set changed upstream keeps working.
pub fn classify_spinner_glyph(ch: char) -> bool {
    if FAST_PATH_SPINNERS.contains(&ch) {
        return true;
    }
    if BOX_DRAWING.contains(&ch) || NON_SPINNER_CHARS.contains(&ch) {
        return false;
    }
    if BRAILLE.contains(&ch) {
        return true;
    }
    matches!(
        get_general_category(ch),
        GeneralCategory::OtherSymbol | GeneralCategory::MathSymbol
    )
}
