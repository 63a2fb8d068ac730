use crate::config::{AppConfigOverrides, DEFAULT_CONFIG_PATH};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

const USAGE: &str = "Supported flags: --width, --height, --vsync, --bounces, --lights, --supersample, --config.";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    width: Option<u32>,
    height: Option<u32>,
    vsync: Option<bool>,
    bounces: Option<u32>,
    lights: Option<u32>,
    supersample: Option<u32>,
    config: Option<PathBuf>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. {USAGE}");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "width" => overrides.width = Some(parse_u32("width", &value)?),
                "height" => overrides.height = Some(parse_u32("height", &value)?),
                "vsync" => overrides.vsync = Some(parse_bool_flag("vsync", &value)?),
                "bounces" => overrides.bounces = Some(parse_u32("bounces", &value)?),
                "lights" => overrides.lights = Some(parse_u32("lights", &value)?),
                "supersample" => overrides.supersample = Some(parse_u32("supersample", &value)?),
                "config" => overrides.config = Some(PathBuf::from(value)),
                _ => bail!("Unknown flag '{flag}'. {USAGE}"),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            width: self.width,
            height: self.height,
            vsync: self.vsync,
            bounces: self.bounces,
            lights: self.lights,
            supersampling: self.supersample,
        }
    }
}

fn parse_u32(flag: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().with_context(|| format!("Invalid {flag} '{value}'"))
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracer_flags() {
        let args = ["app", "--width", "640", "--bounces", "3", "--lights", "4", "--supersample", "2"];
        let overrides = CliOverrides::parse(args).expect("parse overrides").into_config_overrides();
        assert_eq!(overrides.width, Some(640));
        assert_eq!(overrides.bounces, Some(3));
        assert_eq!(overrides.lights, Some(4));
        assert_eq!(overrides.supersampling, Some(2));
        assert_eq!(overrides.height, None);
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["app", "--vsync", "on", "--vsync", "off", "--config", "a.json", "--config", "b.json"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.config_path(), PathBuf::from("b.json"));
        assert_eq!(overrides.into_config_overrides().vsync, Some(false));
    }

    #[test]
    fn default_config_path() {
        let overrides = CliOverrides::parse(["app"]).expect("parse overrides");
        assert_eq!(overrides.config_path(), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["app", "--lights"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_numbers() {
        let err = CliOverrides::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"));
        let err = CliOverrides::parse(["app", "--bounces", "-1"]).unwrap_err();
        assert!(err.to_string().contains("Invalid bounces"));
    }
}
