use std::path::PathBuf;

pub fn default_download_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dirs::download_dir()
        .unwrap_or_else(|| home.join("Downloads"))
        .join("TubeQueue")
}

pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".tubequeue")
}

pub fn settings_file_path() -> PathBuf {
    app_data_dir().join("settings.properties")
}

pub fn default_queue_file_path() -> PathBuf {
    app_data_dir().join("queue.json")
}

pub fn default_archive_path() -> PathBuf {
    app_data_dir().join("archive.txt")
}

pub fn log_dir() -> PathBuf {
    app_data_dir().join("logs")
}

pub fn make_absolute_path(raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

pub fn bin_dir() -> PathBuf {
    app_data_dir().join("bin")
}

pub fn bundled_tool_path(name: &str) -> PathBuf {
    bin_dir().join(format!("{name}{}", std::env::consts::EXE_SUFFIX))
}
