use std::{env, path::{Path, PathBuf}};

pub fn get_wrt_root_dir() -> PathBuf {
    if let Ok(root) = env::var("WRT_PANEL_ROOT") {
        return Path::new(&root).to_path_buf();
    }

    if cfg!(target_os = "windows") {
        let user_data_dir = env::var("APPDATA").unwrap_or_else(|_| {
            env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string())
        });
        Path::new(&user_data_dir).join("wrt-panel")
    } else {
        Path::new("/opt/wrt-panel").to_path_buf()
    }
}

//per-user state of the cli: config.toml and storage.json live here
pub fn get_wrt_user_home() -> PathBuf {
    if let Ok(home) = env::var("WRT_PANEL_HOME") {
        return Path::new(&home).to_path_buf();
    }
    let home_dir = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home_dir).join(".wrtcli")
}

pub fn get_wrt_log_dir(service: &str, is_service: bool) -> PathBuf {
    if is_service {
        get_wrt_root_dir().join("logs").join(service)
    } else if cfg!(target_os = "windows") {
        let temp_dir = env::var("TEMP").or_else(|_| env::var("TMP")).unwrap_or_else(|_| {
            let user_profile = env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
            format!("{}\\AppData\\Local\\Temp", user_profile)
        });
        Path::new(&temp_dir).join(service).join("logs")
    } else {
        Path::new("/tmp").join(service).join("logs")
    }
}

pub fn get_wrt_default_config_path() -> PathBuf {
    get_wrt_user_home().join("config.toml")
}

pub fn get_wrt_default_storage_path() -> PathBuf {
    get_wrt_user_home().join("storage.json")
}
