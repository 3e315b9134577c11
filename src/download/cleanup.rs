use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::app_logger::Severity;
use crate::fs_utils::{files_with_extensions, next_available_path};

use super::process::LogLine;

const AUDIO_EXTENSIONS: [&str; 2] = ["mp3", "flac"];

const PROMO_TAGS: [&str; 31] = [
    "(music video)",
    "(official video)",
    "(official visualizer)",
    "(video oficial)",
    "[official video]",
    "(drone)",
    "(video)",
    "(visualiser)",
    "(lyric video)",
    "(lyrics)",
    "(audio)",
    "(official track)",
    "(original mix)",
    "(hq)",
    "(hd)",
    "(high quality)",
    "(full song)",
    "(snippet)",
    "(reaction)",
    "(review)",
    "(trailer)",
    "(teaser)",
    "(fan edit)",
    "(studio version)",
    "(youtube)",
    "(vevo)",
    "(tiktok)",
    "(drone shot)",
    "(pov video)",
    "(official music video)",
    "(visualizer)",
];

fn tag_pattern() -> Option<Regex> {
    // longest first so "(drone shot)" is not cut down to "(drone)" + " shot)"
    let mut tags: Vec<&str> = PROMO_TAGS.to_vec();
    tags.sort_by_key(|tag| std::cmp::Reverse(tag.len()));
    let alternation = tags
        .iter()
        .map(|tag| regex::escape(tag))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\s*(?:{alternation})"))
        .case_insensitive(true)
        .build()
        .ok()
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !previous_space {
                out.push(c);
            }
            previous_space = true;
        } else {
            out.push(c);
            previous_space = false;
        }
    }
    out
}

/// Returns the cleaned stem, or None when nothing would change.
fn cleaned_stem(pattern: &Regex, stem: &str) -> Option<String> {
    let stripped = pattern.replace_all(stem, "");
    let collapsed = collapse_spaces(&stripped);
    let cleaned = collapsed.trim_matches([' ', '-', '_', '.', ',']).to_string();
    if cleaned.is_empty() || cleaned == stem {
        None
    } else {
        Some(cleaned)
    }
}

/// Strips promotional tags from audio file names under `root`. Failures are
/// reported through `log` as warnings and never abort the pass.
pub fn clean_audio_filenames(root: &Path, log: &mut dyn FnMut(LogLine)) -> usize {
    let Some(pattern) = tag_pattern() else {
        return 0;
    };
    let mut renamed = 0;
    for path in files_with_extensions(root, &AUDIO_EXTENSIONS) {
        let (Some(stem), Some(ext), Some(dir)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
            path.parent(),
        ) else {
            continue;
        };
        let Some(cleaned) = cleaned_stem(&pattern, stem) else {
            continue;
        };
        let target = next_available_path(dir, &cleaned, ext);
        match fs::rename(&path, &target) {
            Ok(()) => {
                renamed += 1;
                let from = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let to = target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                log(LogLine {
                    text: format!("Renamed: {from} -> {to}"),
                    severity: Severity::Info,
                });
            }
            Err(err) => {
                tracing::warn!("rename of {} failed: {err}", path.display());
                log(LogLine {
                    text: format!("Could not rename {}: {err}", path.display()),
                    severity: Severity::Warning,
                });
            }
        }
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::{clean_audio_filenames, cleaned_stem, tag_pattern};
    use std::fs;

    #[test]
    fn strips_tags_case_insensitively() {
        let pattern = tag_pattern().expect("pattern");
        assert_eq!(
            cleaned_stem(&pattern, "Artist - Song (Official Music Video)").as_deref(),
            Some("Artist - Song")
        );
        assert_eq!(
            cleaned_stem(&pattern, "Song (Lyrics)  (HQ) -").as_deref(),
            Some("Song")
        );
        assert_eq!(cleaned_stem(&pattern, "Artist - Song"), None);
        assert_eq!(cleaned_stem(&pattern, "(audio)"), None);
    }

    #[test]
    fn renames_audio_and_resolves_collisions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let album = dir.path().join("Album");
        fs::create_dir_all(&album).expect("mkdir");
        fs::write(album.join("Track.mp3"), b"a").expect("write");
        fs::write(album.join("Track (Official Video).mp3"), b"b").expect("write");
        fs::write(album.join("Other [Official Video].flac"), b"c").expect("write");
        fs::write(album.join("Clip (Official Video).mkv"), b"d").expect("write");

        let mut lines = Vec::new();
        let renamed = clean_audio_filenames(dir.path(), &mut |line| lines.push(line));

        assert_eq!(renamed, 2);
        assert_eq!(lines.len(), 2);
        assert_eq!(fs::read(album.join("Track (1).mp3")).expect("read"), b"b");
        assert!(album.join("Other.flac").exists());
        assert!(album.join("Clip (Official Video).mkv").exists());
    }
}
