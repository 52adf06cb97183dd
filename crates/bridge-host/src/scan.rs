//! Plugin directory scanning.
//!
//! Finds candidate VST2/VST3/CLAP plugin files, either in a directory the
//! caller names explicitly or in the platform's standard plugin
//! directories. Scanning only identifies candidates by file extension; it
//! does not open or validate them - that happens once a worker actually
//! loads one and reports its [`bridge_proto::PluginMetadata`] back over the
//! control socket.

use std::path::{Path, PathBuf};

use bridge_proto::data::PluginKind;

/// Whether `path`'s extension matches a known plugin bundle/library format.
pub fn is_plugin_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext, "vst" | "vst3" | "clap" | "component" | "dll"))
        .unwrap_or(false)
}

/// Guesses a plugin's ABI from its file extension. `.dll` is ambiguous
/// (VST2 and some CLAP builds both ship as bare DLLs on Windows) and is
/// left to the caller to disambiguate, typically by trying to load it and
/// seeing which entry point resolves.
pub fn guess_plugin_kind(path: &Path) -> Option<PluginKind> {
    match path.extension().and_then(|ext| ext.to_str())? {
        "vst" => Some(PluginKind::Vst2),
        "vst3" => Some(PluginKind::Vst3),
        "clap" => Some(PluginKind::Clap),
        _ => None,
    }
}

/// Recursively-flat scan (one directory level) for plugin files.
pub fn scan_directory(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.is_dir() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_plugin_file(&path) {
            found.push(path);
        }
    }
    Ok(found)
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_default()
}

/// Standard VST2 plugin directories for the current platform.
pub fn vst2_search_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Library/Audio/Plug-Ins/VST"),
            PathBuf::from(format!("{}/Library/Audio/Plug-Ins/VST", home_dir())),
        ]
    }
    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\Program Files\\VstPlugins"),
            PathBuf::from("C:\\Program Files\\Common Files\\VST2"),
            PathBuf::from("C:\\Program Files (x86)\\VstPlugins"),
        ]
    }
    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/lib/vst"),
            PathBuf::from("/usr/local/lib/vst"),
            PathBuf::from(format!("{}/.vst", home_dir())),
        ]
    }
}

/// Standard VST3 plugin directories for the current platform.
pub fn vst3_search_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Library/Audio/Plug-Ins/VST3"),
            PathBuf::from(format!("{}/Library/Audio/Plug-Ins/VST3", home_dir())),
        ]
    }
    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\Program Files\\Common Files\\VST3"),
            PathBuf::from("C:\\Program Files (x86)\\Common Files\\VST3"),
        ]
    }
    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/lib/vst3"),
            PathBuf::from("/usr/local/lib/vst3"),
            PathBuf::from(format!("{}/.vst3", home_dir())),
        ]
    }
}

/// Standard CLAP plugin directories for the current platform.
pub fn clap_search_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Library/Audio/Plug-Ins/CLAP"),
            PathBuf::from(format!("{}/Library/Audio/Plug-Ins/CLAP", home_dir())),
        ]
    }
    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\Program Files\\Common Files\\CLAP"),
            PathBuf::from("C:\\Program Files (x86)\\Common Files\\CLAP"),
        ]
    }
    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/lib/clap"),
            PathBuf::from("/usr/local/lib/clap"),
            PathBuf::from(format!("{}/.clap", home_dir())),
        ]
    }
}

/// Scans every standard directory for `kind`, skipping ones that don't
/// exist on this machine.
pub fn scan_system_plugins(kind: PluginKind) -> Vec<PathBuf> {
    let search_paths = match kind {
        PluginKind::Vst2 => vst2_search_paths(),
        PluginKind::Vst3 => vst3_search_paths(),
        PluginKind::Clap => clap_search_paths(),
    };

    search_paths
        .into_iter()
        .filter(|path| path.exists())
        .flat_map(|path| scan_directory(&path).unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_plugin_extensions() {
        assert!(is_plugin_file(Path::new("/path/to/plugin.vst")));
        assert!(is_plugin_file(Path::new("/path/to/plugin.vst3")));
        assert!(is_plugin_file(Path::new("/path/to/plugin.clap")));
        assert!(!is_plugin_file(Path::new("/path/to/plugin.txt")));
        assert!(!is_plugin_file(Path::new("/path/to/plugin")));
    }

    #[test]
    fn guesses_kind_from_extension() {
        assert_eq!(guess_plugin_kind(Path::new("Reverb.vst3")), Some(PluginKind::Vst3));
        assert_eq!(guess_plugin_kind(Path::new("Reverb.clap")), Some(PluginKind::Clap));
        assert_eq!(guess_plugin_kind(Path::new("Reverb.txt")), None);
    }

    #[test]
    fn scan_directory_finds_plugin_files_and_ignores_others() {
        let dir = std::env::temp_dir().join(format!("scan-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Reverb.vst3"), b"").unwrap();
        std::fs::write(dir.join("readme.txt"), b"").unwrap();

        let found = scan_directory(&dir).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("Reverb.vst3"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
