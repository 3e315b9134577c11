use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use time::Date;
use time::macros::format_description;

use crate::error::ConfigError;
use crate::paths::{default_archive_path, default_download_dir, make_absolute_path, settings_file_path};

pub const DEFAULT_RETRIES: u32 = 10;
pub const VIDEO_CONTAINERS: [&str; 3] = ["mkv", "mp4", "webm"];
pub const THUMBNAIL_FORMATS: [&str; 3] = ["png", "jpg", "webp"];
pub const COOKIE_BROWSERS: [&str; 8] = [
    "", "chrome", "firefox", "edge", "brave", "opera", "safari", "vivaldi",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChaptersMode {
    #[default]
    None,
    Embed,
    Split,
}

impl ChaptersMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChaptersMode::None => "none",
            ChaptersMode::Embed => "embed",
            ChaptersMode::Split => "split",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "embed" => ChaptersMode::Embed,
            "split" => ChaptersMode::Split,
            _ => ChaptersMode::None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SponsorCategory {
    Sponsor,
    Intro,
    Outro,
    SelfPromo,
    Interaction,
    MusicOfftopic,
    Preview,
    Filler,
}

impl SponsorCategory {
    pub const ALL: [SponsorCategory; 8] = [
        SponsorCategory::Sponsor,
        SponsorCategory::Intro,
        SponsorCategory::Outro,
        SponsorCategory::SelfPromo,
        SponsorCategory::Interaction,
        SponsorCategory::MusicOfftopic,
        SponsorCategory::Preview,
        SponsorCategory::Filler,
    ];

    pub fn code(self) -> &'static str {
        match self {
            SponsorCategory::Sponsor => "sponsor",
            SponsorCategory::Intro => "intro",
            SponsorCategory::Outro => "outro",
            SponsorCategory::SelfPromo => "selfpromo",
            SponsorCategory::Interaction => "interaction",
            SponsorCategory::MusicOfftopic => "music_offtopic",
            SponsorCategory::Preview => "preview",
            SponsorCategory::Filler => "filler",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SponsorCategory::Sponsor => "Sponsor",
            SponsorCategory::Intro => "Intro",
            SponsorCategory::Outro => "Outro",
            SponsorCategory::SelfPromo => "Self Promotion",
            SponsorCategory::Interaction => "Interaction Reminder",
            SponsorCategory::MusicOfftopic => "Music Non-Music",
            SponsorCategory::Preview => "Preview/Recap",
            SponsorCategory::Filler => "Filler",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, ConfigError> {
        let wanted = code.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.code() == wanted)
            .ok_or_else(|| ConfigError::UnknownSponsorCategory(wanted.to_string()))
    }
}

/// Every user-tunable download option. A clone of this is taken when a
/// download launches, so later edits never reach an in-flight process.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadOptions {
    pub download_dir: PathBuf,
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
    pub cookies_file: String,
    pub cookies_browser: String,
    pub proxy_url: String,
    pub limit_rate: String,
    pub retries: u32,
    pub date_after: String,
    pub live_from_start: bool,
    pub enable_archive: bool,
    pub archive_path: PathBuf,
    pub playlist_reverse: bool,
    pub playlist_items: String,
    pub clip_start: String,
    pub clip_end: String,
    pub organize_by_uploader: bool,
    pub video_container: String,
    pub music_metadata: bool,
    pub add_metadata: bool,
    pub normalize_audio: bool,
    pub crop_covers: bool,
    pub custom_ffmpeg_args: String,
    pub write_thumbnail: bool,
    pub embed_thumbnail: bool,
    pub thumbnail_format: String,
    pub sponsorblock: Vec<SponsorCategory>,
    pub chapters: ChaptersMode,
    pub write_subs: bool,
    pub sub_langs: String,
    pub auto_subs: bool,
    pub convert_subs_srt: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            yt_dlp_path: String::new(),
            ffmpeg_path: String::new(),
            cookies_file: String::new(),
            cookies_browser: String::new(),
            proxy_url: String::new(),
            limit_rate: String::new(),
            retries: DEFAULT_RETRIES,
            date_after: String::new(),
            live_from_start: false,
            enable_archive: false,
            archive_path: default_archive_path(),
            playlist_reverse: false,
            playlist_items: String::new(),
            clip_start: String::new(),
            clip_end: String::new(),
            organize_by_uploader: false,
            video_container: "mkv".to_string(),
            music_metadata: false,
            add_metadata: false,
            normalize_audio: false,
            crop_covers: false,
            custom_ffmpeg_args: String::new(),
            write_thumbnail: false,
            embed_thumbnail: false,
            thumbnail_format: "png".to_string(),
            sponsorblock: Vec::new(),
            chapters: ChaptersMode::None,
            write_subs: false,
            sub_langs: String::new(),
            auto_subs: false,
            convert_subs_srt: false,
        }
    }
}

impl DownloadOptions {
    /// Checks the options a form may produce before they are saved or used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let proxy = self.proxy_url.trim();
        if !proxy.is_empty() && !(proxy.starts_with("http://") || proxy.starts_with("socks5://")) {
            return Err(ConfigError::InvalidProxy(proxy.to_string()));
        }

        if self.write_subs {
            let langs = self.sub_langs.trim();
            if langs.is_empty() {
                return Err(ConfigError::MissingSubtitleLanguages);
            }
            let tokens: Vec<&str> = langs
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .collect();
            if tokens.is_empty() {
                return Err(ConfigError::MissingSubtitleLanguages);
            }
            if let Some(bad) = tokens.iter().find(|token| !(2..=3).contains(&token.chars().count())) {
                return Err(ConfigError::InvalidSubtitleLanguage(bad.to_string()));
            }
        }

        let date = self.date_after.trim();
        if !date.is_empty() {
            let format = format_description!("[year][month][day]");
            if date.len() != 8 || Date::parse(date, format).is_err() {
                return Err(ConfigError::InvalidDate(date.to_string()));
            }
        }

        Ok(())
    }

    pub fn has_sponsor_category(&self, category: SponsorCategory) -> bool {
        self.sponsorblock.contains(&category)
    }

    /// Short descriptions of the non-default behaviours that are switched on.
    pub fn active_features(&self) -> Vec<String> {
        let mut features = Vec::new();
        let proxy = self.proxy_url.trim();
        if !proxy.is_empty() {
            features.push(format!("proxy {proxy}"));
        }
        if !self.sponsorblock.is_empty() {
            let codes: Vec<&str> = self.sponsorblock.iter().map(|c| c.code()).collect();
            features.push(format!("SponsorBlock ({})", codes.join(",")));
        }
        if self.chapters != ChaptersMode::None {
            features.push(format!("chapters: {}", self.chapters.as_str()));
        }
        if self.enable_archive {
            features.push(format!("archive {}", self.archive_path.display()));
        }
        let (start, end) = (self.clip_start.trim(), self.clip_end.trim());
        if !start.is_empty() || !end.is_empty() {
            features.push(format!("clip {start}-{end}"));
        }
        features
    }

    pub fn set_sponsor_category(&mut self, category: SponsorCategory, enabled: bool) {
        if enabled {
            if !self.sponsorblock.contains(&category) {
                self.sponsorblock.push(category);
                self.sponsorblock.sort();
            }
        } else {
            self.sponsorblock.retain(|existing| *existing != category);
        }
    }

    fn from_properties(props: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| props.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let flag = |key: &str| props.get(key).map(|v| parse_bool(v, false)).unwrap_or(false);

        let download_dir = props
            .get("output.dir")
            .map(|value| normalize_dir(value))
            .unwrap_or(defaults.download_dir);
        let archive_path = props
            .get("playlist.archive.path")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(make_absolute_path)
            .unwrap_or(defaults.archive_path);
        let retries = props
            .get("network.retries")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);
        let video_container = props
            .get("output.video_container")
            .map(|value| value.trim().trim_start_matches('.').to_lowercase())
            .filter(|value| VIDEO_CONTAINERS.contains(&value.as_str()))
            .unwrap_or(defaults.video_container);
        let thumbnail_format = props
            .get("post.thumbnail_format")
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.thumbnail_format);
        let sponsorblock = props
            .get("sponsorblock.categories")
            .map(|value| parse_category_list(value))
            .unwrap_or_default();
        let chapters = props
            .get("chapters.mode")
            .map(|value| ChaptersMode::parse(value))
            .unwrap_or_default();

        Self {
            download_dir,
            yt_dlp_path: text("tools.yt_dlp"),
            ffmpeg_path: text("tools.ffmpeg"),
            cookies_file: text("network.cookies.file"),
            cookies_browser: text("network.cookies.browser"),
            proxy_url: text("network.proxy"),
            limit_rate: text("network.limit_rate"),
            retries,
            date_after: text("filter.date_after"),
            live_from_start: flag("filter.live_from_start"),
            enable_archive: flag("playlist.archive.enabled"),
            archive_path,
            playlist_reverse: flag("playlist.reverse"),
            playlist_items: text("playlist.items"),
            clip_start: text("clip.start"),
            clip_end: text("clip.end"),
            organize_by_uploader: flag("output.organize_by_uploader"),
            video_container,
            music_metadata: flag("post.music_metadata"),
            add_metadata: flag("post.add_metadata"),
            normalize_audio: flag("post.normalize_audio"),
            crop_covers: flag("post.crop_covers"),
            custom_ffmpeg_args: text("post.custom_ffmpeg_args"),
            write_thumbnail: flag("post.write_thumbnail"),
            embed_thumbnail: flag("post.embed_thumbnail"),
            thumbnail_format,
            sponsorblock,
            chapters,
            write_subs: flag("subtitles.enabled"),
            sub_langs: text("subtitles.langs"),
            auto_subs: flag("subtitles.auto"),
            convert_subs_srt: flag("subtitles.convert_srt"),
        }
    }

    fn push_properties(&self, lines: &mut Vec<String>) {
        let mut put = |key: &str, value: String| lines.push(format!("{key}={}", value.trim()));
        put("output.dir", self.download_dir.to_string_lossy().to_string());
        put("output.organize_by_uploader", bool_text(self.organize_by_uploader));
        put("output.video_container", self.video_container.clone());
        put("tools.yt_dlp", self.yt_dlp_path.clone());
        put("tools.ffmpeg", self.ffmpeg_path.clone());
        put("network.proxy", self.proxy_url.clone());
        put("network.cookies.file", self.cookies_file.clone());
        put("network.cookies.browser", self.cookies_browser.clone());
        put("network.limit_rate", self.limit_rate.clone());
        put("network.retries", self.retries.to_string());
        put("filter.date_after", self.date_after.clone());
        put("filter.live_from_start", bool_text(self.live_from_start));
        put("playlist.archive.enabled", bool_text(self.enable_archive));
        put("playlist.archive.path", self.archive_path.to_string_lossy().to_string());
        put("playlist.reverse", bool_text(self.playlist_reverse));
        put("playlist.items", self.playlist_items.clone());
        put("clip.start", self.clip_start.clone());
        put("clip.end", self.clip_end.clone());
        put("post.add_metadata", bool_text(self.add_metadata));
        put("post.normalize_audio", bool_text(self.normalize_audio));
        put("post.crop_covers", bool_text(self.crop_covers));
        put("post.music_metadata", bool_text(self.music_metadata));
        put("post.custom_ffmpeg_args", self.custom_ffmpeg_args.clone());
        put("post.write_thumbnail", bool_text(self.write_thumbnail));
        put("post.embed_thumbnail", bool_text(self.embed_thumbnail));
        put("post.thumbnail_format", self.thumbnail_format.clone());
        put(
            "sponsorblock.categories",
            self.sponsorblock
                .iter()
                .map(|category| category.code())
                .collect::<Vec<_>>()
                .join(","),
        );
        put("chapters.mode", self.chapters.as_str().to_string());
        put("subtitles.enabled", bool_text(self.write_subs));
        put("subtitles.langs", self.sub_langs.clone());
        put("subtitles.auto", bool_text(self.auto_subs));
        put("subtitles.convert_srt", bool_text(self.convert_subs_srt));
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SettingsData {
    pub window_width: f32,
    pub window_height: f32,
    pub file_logging: bool,
    pub options: DownloadOptions,
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
            file_logging: true,
            options: DownloadOptions::default(),
        }
    }
}

impl SettingsData {
    pub fn load() -> Self {
        Self::load_from(&settings_file_path())
    }

    pub fn load_from(path: &Path) -> Self {
        let props = read_properties_from_path(path).unwrap_or_default();
        Self::from_properties(&props)
    }

    pub fn save(&self) -> Result<(), String> {
        self.save_to(&settings_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        fs::write(path, self.to_properties_string()).map_err(|err| err.to_string())
    }

    fn from_properties(props: &HashMap<String, String>) -> Self {
        Self {
            window_width: parse_dimension(props.get("window.width"), DEFAULT_WINDOW_WIDTH, MIN_WINDOW_WIDTH),
            window_height: parse_dimension(
                props.get("window.height"),
                DEFAULT_WINDOW_HEIGHT,
                MIN_WINDOW_HEIGHT,
            ),
            file_logging: props
                .get("logging.file")
                .map(|v| parse_bool(v, true))
                .unwrap_or(true),
            options: DownloadOptions::from_properties(props),
        }
    }

    fn to_properties_string(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("window.width={}", format_dimension(self.window_width)));
        lines.push(format!("window.height={}", format_dimension(self.window_height)));
        lines.push(format!("logging.file={}", bool_text(self.file_logging)));
        self.options.push_properties(&mut lines);
        lines.join("\n")
    }
}

fn read_properties_from_path(path: &Path) -> Option<HashMap<String, String>> {
    let contents = fs::read_to_string(path).ok()?;
    Some(parse_properties(&contents))
}

fn parse_properties(contents: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        // Values such as proxy URLs contain ':', so only the first '=' or ':' splits.
        let mut split = line.splitn(2, |c| c == '=' || c == ':');
        let key = split.next().unwrap_or("").trim();
        let value = split.next().unwrap_or("").trim();
        if !key.is_empty() {
            props.insert(key.to_string(), value.to_string());
        }
    }
    props
}

fn parse_category_list(raw: &str) -> Vec<SponsorCategory> {
    let mut out = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|code| !code.is_empty()) {
        match SponsorCategory::from_code(code) {
            Ok(category) => {
                if !out.contains(&category) {
                    out.push(category);
                }
            }
            Err(err) => tracing::warn!("ignoring stored setting: {err}"),
        }
    }
    out.sort();
    out
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback;
    }
    trimmed.eq_ignore_ascii_case("true")
}

fn bool_text(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

pub const DEFAULT_WINDOW_WIDTH: f32 = 980.0;
pub const DEFAULT_WINDOW_HEIGHT: f32 = 680.0;
pub const MIN_WINDOW_WIDTH: f32 = 640.0;
pub const MIN_WINDOW_HEIGHT: f32 = 420.0;

fn parse_dimension(raw: Option<&String>, fallback: f32, min: f32) -> f32 {
    let Some(raw) = raw else {
        return fallback.max(min);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return fallback.max(min);
    }
    let parsed = trimmed.parse::<f32>().unwrap_or(fallback);
    parsed.max(min)
}

fn format_dimension(value: f32) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{value}")
    }
}

fn normalize_dir(value: &str) -> PathBuf {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return default_download_dir();
    }
    make_absolute_path(trimmed)
}

#[cfg(test)]
mod tests {
    use super::{
        ChaptersMode, DownloadOptions, SettingsData, SponsorCategory, parse_properties,
    };
    use crate::error::ConfigError;

    #[test]
    fn subtitles_without_languages_are_rejected() {
        let options = DownloadOptions {
            write_subs: true,
            sub_langs: String::new(),
            ..DownloadOptions::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::MissingSubtitleLanguages));

        let options = DownloadOptions {
            write_subs: true,
            sub_langs: " , ".to_string(),
            ..DownloadOptions::default()
        };
        assert_eq!(options.validate(), Err(ConfigError::MissingSubtitleLanguages));
    }

    #[test]
    fn subtitle_language_codes_must_be_short() {
        let options = DownloadOptions {
            write_subs: true,
            sub_langs: "en,english".to_string(),
            ..DownloadOptions::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::InvalidSubtitleLanguage("english".to_string()))
        );

        let options = DownloadOptions {
            write_subs: true,
            sub_langs: "en, es,fra".to_string(),
            ..DownloadOptions::default()
        };
        assert_eq!(options.validate(), Ok(()));
    }

    #[test]
    fn proxy_scheme_is_checked() {
        let mut options = DownloadOptions {
            proxy_url: "ftp://proxy:21".to_string(),
            ..DownloadOptions::default()
        };
        assert!(matches!(options.validate(), Err(ConfigError::InvalidProxy(_))));

        options.proxy_url = "socks5://127.0.0.1:9050".to_string();
        assert_eq!(options.validate(), Ok(()));
    }

    #[test]
    fn date_filter_must_be_a_calendar_date() {
        let mut options = DownloadOptions {
            date_after: "20241301".to_string(),
            ..DownloadOptions::default()
        };
        assert!(matches!(options.validate(), Err(ConfigError::InvalidDate(_))));

        options.date_after = "20240229".to_string();
        assert_eq!(options.validate(), Ok(()));
    }

    #[test]
    fn unknown_sponsor_codes_are_rejected() {
        assert_eq!(
            SponsorCategory::from_code("music_offtopic"),
            Ok(SponsorCategory::MusicOfftopic)
        );
        assert_eq!(
            SponsorCategory::from_code("ads"),
            Err(ConfigError::UnknownSponsorCategory("ads".to_string()))
        );
    }

    #[test]
    fn properties_file_survives_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.properties");

        let mut data = SettingsData::default();
        data.options.download_dir = dir.path().join("out");
        data.options.proxy_url = "http://127.0.0.1:8080".to_string();
        data.options.chapters = ChaptersMode::Split;
        data.options.retries = 3;
        data.options.set_sponsor_category(SponsorCategory::Intro, true);
        data.options.set_sponsor_category(SponsorCategory::Sponsor, true);
        data.options.write_subs = true;
        data.options.sub_langs = "en,de".to_string();
        data.options.custom_ffmpeg_args = "-ar 44100".to_string();
        data.save_to(&path).expect("save");

        let loaded = SettingsData::load_from(&path);
        assert_eq!(loaded, data);
        assert_eq!(
            loaded.options.sponsorblock,
            vec![SponsorCategory::Sponsor, SponsorCategory::Intro]
        );
    }

    #[test]
    fn stored_values_fall_back_when_malformed() {
        let props = parse_properties(
            "# comment\nnetwork.retries=lots\nchapters.mode=both\nsponsorblock.categories=sponsor, bogus ,filler\noutput.video_container=avi\n",
        );
        let options = DownloadOptions::from_properties(&props);
        assert_eq!(options.retries, super::DEFAULT_RETRIES);
        assert_eq!(options.chapters, ChaptersMode::None);
        assert_eq!(options.video_container, "mkv");
        assert_eq!(
            options.sponsorblock,
            vec![SponsorCategory::Sponsor, SponsorCategory::Filler]
        );
    }

    #[test]
    fn active_features_list_only_enabled_toggles() {
        assert!(DownloadOptions::default().active_features().is_empty());

        let mut options = DownloadOptions {
            proxy_url: "socks5://127.0.0.1:1080".to_string(),
            chapters: ChaptersMode::Split,
            clip_start: "00:01:00".to_string(),
            ..DownloadOptions::default()
        };
        options.set_sponsor_category(SponsorCategory::Sponsor, true);
        let features = options.active_features();
        assert_eq!(features.len(), 4);
        assert_eq!(features[0], "proxy socks5://127.0.0.1:1080");
        assert!(features[1].starts_with("SponsorBlock ("));
        assert_eq!(features[2], "chapters: split");
        assert_eq!(features[3], "clip 00:01:00-");
    }
}
