use crate::fs_utils::is_non_empty_file;
use crate::queue::QueueItem;
use crate::settings::{ChaptersMode, DownloadOptions, VIDEO_CONTAINERS};

use super::tools::ToolPaths;

pub const DEFAULT_VIDEO_FORMAT: &str = "bestvideo+bestaudio/best";
const AUDIO_CODES: [&str; 4] = ["bestaudio", "playlist_mp3", "youtube_music", "audio_flac"];
const PLAYLIST_CODES: [&str; 2] = ["playlist_mp3", "youtube_music"];
const MAX_FILENAME_CHARS: usize = 180;
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub struct FormatPreset {
    pub label: &'static str,
    pub code: &'static str,
}

pub const FORMAT_PRESETS: [FormatPreset; 8] = [
    FormatPreset {
        label: "Best Video",
        code: DEFAULT_VIDEO_FORMAT,
    },
    FormatPreset {
        label: "1080p",
        code: "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
    },
    FormatPreset {
        label: "720p",
        code: "bestvideo[height<=720]+bestaudio/best[height<=720]",
    },
    FormatPreset {
        label: "480p",
        code: "bestvideo[height<=480]+bestaudio/best[height<=480]",
    },
    FormatPreset {
        label: "Audio (MP3)",
        code: "bestaudio",
    },
    FormatPreset {
        label: "Audio (FLAC)",
        code: "audio_flac",
    },
    FormatPreset {
        label: "Playlist (MP3)",
        code: "playlist_mp3",
    },
    FormatPreset {
        label: "YouTube Music",
        code: "youtube_music",
    },
];

pub fn preset_label(code: &str) -> &str {
    FORMAT_PRESETS
        .iter()
        .find(|preset| preset.code == code)
        .map(|preset| preset.label)
        .unwrap_or(code)
}

pub fn is_audio_format(code: &str) -> bool {
    AUDIO_CODES.contains(&code)
}

pub fn is_playlist(item: &QueueItem) -> bool {
    item.url.contains("list=") || PLAYLIST_CODES.contains(&item.format_code.as_str())
}

fn is_shorts_url(url: &str) -> bool {
    url.contains("youtube.com/shorts/")
}

/// Cookie arguments shared by downloads and metadata lookups. A browser
/// name wins over a cookies file; an empty or missing file is skipped.
pub fn cookie_args(options: &DownloadOptions) -> Vec<String> {
    let browser = options.cookies_browser.trim();
    if !browser.is_empty() {
        return vec!["--cookies-from-browser".to_string(), browser.to_string()];
    }
    let file = options.cookies_file.trim();
    if !file.is_empty() && is_non_empty_file(std::path::Path::new(file)) {
        return vec!["--cookies".to_string(), file.to_string()];
    }
    Vec::new()
}

fn has_auth(options: &DownloadOptions) -> bool {
    !cookie_args(options).is_empty()
}

/// Renders the full yt-dlp invocation for `item`. The executable comes first
/// and the URL last; nothing here touches shared state.
pub fn build_command(item: &QueueItem, options: &DownloadOptions, tools: &ToolPaths) -> Vec<String> {
    let playlist = is_playlist(item);
    let audio = is_audio_format(&item.format_code);
    let code = item.format_code.as_str();

    let mut args = vec![
        tools.yt_dlp.to_string_lossy().to_string(),
        "--no-warnings".to_string(),
        "--progress".to_string(),
        "--newline".to_string(),
        "--output-na-placeholder".to_string(),
        "Unknown".to_string(),
        "--ffmpeg-location".to_string(),
        tools.ffmpeg_dir().to_string_lossy().to_string(),
    ];

    args.extend(cookie_args(options));
    push_value(&mut args, "--proxy", &options.proxy_url);
    push_value(&mut args, "--limit-rate", &options.limit_rate);
    args.push("--retries".to_string());
    args.push(options.retries.to_string());
    push_value(&mut args, "--dateafter", &options.date_after);
    if options.live_from_start {
        args.push("--live-from-start".to_string());
    }
    if playlist {
        args.push("--ignore-errors".to_string());
    }
    if options.enable_archive {
        args.push("--download-archive".to_string());
        args.push(options.archive_path.to_string_lossy().to_string());
    }
    if options.playlist_reverse {
        args.push("--playlist-reverse".to_string());
    }
    push_value(&mut args, "--playlist-items", &options.playlist_items);
    let (clip_start, clip_end) = (options.clip_start.trim(), options.clip_end.trim());
    if !clip_start.is_empty() && !clip_end.is_empty() {
        args.push("--download-sections".to_string());
        args.push(format!("*{clip_start}-{clip_end}"));
    }

    let template = output_template(item, options, playlist, audio);
    if playlist {
        args.push("--yes-playlist".to_string());
    }
    args.push("-o".to_string());
    args.push(template);

    if audio {
        push_audio_args(&mut args, code, options);
    } else {
        push_video_args(&mut args, code, options);
    }

    if !options.sponsorblock.is_empty() && !is_shorts_url(&item.url) {
        let categories = options
            .sponsorblock
            .iter()
            .map(|category| category.code())
            .collect::<Vec<_>>()
            .join(",");
        args.extend([
            "--sponsorblock-remove".to_string(),
            categories,
            "--sleep-requests".to_string(),
            "1".to_string(),
            "--sleep-subtitles".to_string(),
            "1".to_string(),
        ]);
    }

    match options.chapters {
        ChaptersMode::Split => args.push("--split-chapters".to_string()),
        ChaptersMode::Embed => args.push("--embed-chapters".to_string()),
        ChaptersMode::None => {}
    }

    if options.write_subs {
        args.push("--write-subs".to_string());
        push_value(&mut args, "--sub-langs", &options.sub_langs);
        if options.auto_subs {
            args.push("--write-auto-subs".to_string());
        }
        if options.convert_subs_srt {
            args.push("--convert-subs".to_string());
            args.push("srt".to_string());
        }
    }

    if options.write_thumbnail {
        args.push("--write-thumbnail".to_string());
    }
    if !audio && options.embed_thumbnail {
        let fmt = options.thumbnail_format.trim();
        args.push("--embed-thumbnail".to_string());
        args.push("--postprocessor-args".to_string());
        args.push(format!(
            "ffmpeg:-metadata:s:t mimetype=image/{fmt} -metadata:s:t filename=cover.{fmt}"
        ));
    }

    let custom = options.custom_ffmpeg_args.trim();
    if !custom.is_empty() {
        args.push("--postprocessor-args".to_string());
        args.push(format!("ffmpeg:{custom}"));
    }

    args.push(item.url.clone());
    args
}

fn output_template(item: &QueueItem, options: &DownloadOptions, playlist: bool, audio: bool) -> String {
    let mut dir = options.download_dir.clone();
    if playlist {
        dir.push("%(playlist_title)s");
    }
    if options.organize_by_uploader {
        dir.push("%(uploader)s");
    }

    let file_name = if !playlist && !has_auth(options) {
        format!("{}.%(ext)s", safe_filename(&item.title))
    } else if options.music_metadata && (audio || playlist) {
        "%(artist)s - %(title)s.%(ext)s".to_string()
    } else {
        "%(title)s.%(ext)s".to_string()
    };
    dir.join(file_name).to_string_lossy().to_string()
}

fn push_audio_args(args: &mut Vec<String>, code: &str, options: &DownloadOptions) {
    let flac = code == "audio_flac";
    args.extend([
        "-f".to_string(),
        "bestaudio".to_string(),
        "--extract-audio".to_string(),
        "--audio-format".to_string(),
        if flac { "flac" } else { "mp3" }.to_string(),
        "--embed-thumbnail".to_string(),
    ]);
    if options.add_metadata {
        args.push("--add-metadata".to_string());
    }
    if flac {
        args.push("--postprocessor-args".to_string());
        args.push("ffmpeg:-compression_level 12 -sample_fmt s16".to_string());
    } else {
        args.push("--audio-quality".to_string());
        args.push("0".to_string());
    }
    if options.normalize_audio {
        args.push("--postprocessor-args".to_string());
        args.push("ExtractAudio+ffmpeg_o:-af loudnorm=I=-16:TP=-1.5:LRA=11".to_string());
    }
    // order matters: each rule reads fields set by the previous one
    if code == "youtube_music" && options.music_metadata {
        for rule in [
            "description:(?s)(?P<meta_comment>.+)",
            "%(meta_comment)s:(?P<artist>[^\\n]+)",
            "%(meta_comment)s:.+ - (?P<title>[^\\n]+)",
        ] {
            args.push("--parse-metadata".to_string());
            args.push(rule.to_string());
        }
    }
}

fn push_video_args(args: &mut Vec<String>, code: &str, options: &DownloadOptions) {
    let format = if code.trim().is_empty() {
        DEFAULT_VIDEO_FORMAT
    } else {
        code
    };
    let container = options.video_container.trim().to_lowercase();
    let container = if VIDEO_CONTAINERS.contains(&container.as_str()) {
        container
    } else {
        "mkv".to_string()
    };
    args.extend([
        "-f".to_string(),
        format.to_string(),
        "--merge-output-format".to_string(),
        container,
    ]);
    if options.add_metadata {
        args.push("--add-metadata".to_string());
    }
}

fn push_value(args: &mut Vec<String>, flag: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Makes `title` usable as a file name on every desktop platform.
pub fn safe_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .filter(|c| (*c as u32) >= 32)
        .map(|c| if "\\/:*?\"<>|".contains(c) { ' ' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut name = collapsed.trim_end_matches([' ', '.']).to_string();

    let upper = name.to_ascii_uppercase();
    if RESERVED_NAMES.contains(&upper.as_str()) {
        name.push('_');
    }

    if name.chars().count() > MAX_FILENAME_CHARS {
        name = name.chars().take(MAX_FILENAME_CHARS).collect();
        name = name.trim_end_matches([' ', '.']).to_string();
    }

    if name.is_empty() {
        "Unknown".to_string()
    } else {
        name
    }
}
