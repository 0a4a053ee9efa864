use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Upload,
    Download,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Upload => "upload",
            JobKind::Download => "download",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    #[default]
    En,
    De,
}

impl Lang {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" | "en_us" | "en_gb" => Ok(Lang::En),
            "de" | "de_de" | "de_at" | "de_ch" => Ok(Lang::De),
            _ => Err(format!("invalid language {}; expected en or de", value)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::De => "de",
        }
    }
}

/// Archive names are passed to borg as `repo::name`; keep them to a safe alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName(String);

impl ArchiveName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ArchiveName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "." || s == ".." {
            return Err("archive name is empty".to_string());
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'))
        {
            return Err(format!(
                "archive name {} must use only letters, digits, '.', '-', '_', '+', '@'",
                s
            ));
        }
        Ok(ArchiveName(s.to_string()))
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_rejects_repo_separator_tricks() {
        assert!("host-2026-01-01_10-00-00".parse::<ArchiveName>().is_ok());
        assert!("a/b".parse::<ArchiveName>().is_err());
        assert!("..".parse::<ArchiveName>().is_err());
        assert!("name with space".parse::<ArchiveName>().is_err());
    }

    #[test]
    fn lang_accepts_locale_variants() {
        assert_eq!(Lang::parse("DE_de").unwrap(), Lang::De);
        assert_eq!(Lang::parse("en").unwrap(), Lang::En);
        assert!(Lang::parse("fr").is_err());
    }
}
