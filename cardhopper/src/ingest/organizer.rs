//! Destination path computation.
//!
//! [`destination_path`] does no I/O: the same inputs always produce the same
//! path, which is what makes manifest replay meaningful.

use crate::fs::MediaFile;
use chrono::{DateTime, Datelike, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How files are grouped into subdirectories by their timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrganizationScheme {
    /// `YYYY-MM-DD/`
    #[default]
    Date,
    /// `YYYY/MM/`
    YearMonth,
    /// No subdirectory
    Flat,
    /// Any unrecognized value; organized like `Date`
    #[serde(other)]
    Other,
}

/// Per-file naming inputs.
#[derive(Debug, Clone, Default)]
pub struct NamingOptions<'a> {
    pub label: Option<&'a str>,
    pub rename_enabled: bool,
    pub rename_pattern: Option<&'a str>,
    /// Position of the file within the run, starting at 1
    pub sequence: u32,
}

const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace characters that are invalid in file names with `_`.
pub fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Compute where `file` lands under `dest_root`.
pub fn destination_path(
    dest_root: &Path,
    file: &MediaFile,
    scheme: OrganizationScheme,
    options: &NamingOptions<'_>,
) -> PathBuf {
    let date = file.mtime.unwrap_or_else(Local::now);
    let (yyyy, mm, dd) = date_parts(&date);

    let mut subdirs: Vec<String> = match scheme {
        OrganizationScheme::Flat => Vec::new(),
        OrganizationScheme::YearMonth => vec![yyyy.clone(), mm.clone()],
        OrganizationScheme::Date | OrganizationScheme::Other => {
            vec![format!("{yyyy}-{mm}-{dd}")]
        }
    };

    let label = options
        .label
        .filter(|l| !l.trim().is_empty())
        .map(sanitize_label);

    if let Some(label) = &label {
        match subdirs.last_mut() {
            Some(last) => {
                last.push('_');
                last.push_str(label);
            }
            None => subdirs.push(label.clone()),
        }
    }

    let pattern = options
        .rename_pattern
        .filter(|p| options.rename_enabled && !p.is_empty());

    let file_name = match pattern {
        Some(pattern) => {
            let original = Path::new(&file.file_name);
            let stem = original
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let seq = format!("{:03}", options.sequence.max(1));

            let mut name = pattern
                .replace("{date}", &format!("{yyyy}-{mm}-{dd}"))
                .replace("{year}", &yyyy)
                .replace("{month}", &mm)
                .replace("{day}", &dd)
                .replace("{seq}", &seq)
                .replace("{original}", &stem)
                .replace("{label}", label.as_deref().unwrap_or(""));

            if let Some(ext) = original.extension() {
                name.push('.');
                name.push_str(&ext.to_string_lossy());
            }
            name
        }
        None => file.file_name.clone(),
    };

    let mut path = dest_root.to_path_buf();
    path.extend(subdirs);
    path.push(file_name);
    path
}

fn date_parts(date: &DateTime<Local>) -> (String, String, String) {
    (
        format!("{:04}", date.year()),
        format!("{:02}", date.month()),
        format!("{:02}", date.day()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn media(name: &str) -> MediaFile {
        MediaFile {
            relative_path: PathBuf::from("DCIM").join(name),
            absolute_path: PathBuf::from("/Volumes/CARD/DCIM").join(name),
            file_name: name.to_string(),
            size: 1024,
            mtime: Some(Local.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()),
        }
    }

    fn dest() -> PathBuf {
        PathBuf::from("/photos")
    }

    #[test]
    fn test_date_scheme() {
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Date,
            &NamingOptions::default(),
        );
        assert_eq!(path, dest().join("2024-03-05").join("IMG_0001.JPG"));
    }

    #[test]
    fn test_year_month_scheme() {
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::YearMonth,
            &NamingOptions::default(),
        );
        assert_eq!(path, dest().join("2024").join("03").join("IMG_0001.JPG"));
    }

    #[test]
    fn test_flat_scheme() {
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Flat,
            &NamingOptions::default(),
        );
        assert_eq!(path, dest().join("IMG_0001.JPG"));
    }

    #[test]
    fn test_unrecognized_scheme_falls_back_to_date() {
        let file = media("IMG_0001.JPG");
        let options = NamingOptions::default();
        assert_eq!(
            destination_path(&dest(), &file, OrganizationScheme::Other, &options),
            destination_path(&dest(), &file, OrganizationScheme::Date, &options),
        );
    }

    #[test]
    fn test_rename_date_seq() {
        let options = NamingOptions {
            rename_enabled: true,
            rename_pattern: Some("{date}_{seq}"),
            sequence: 3,
            ..Default::default()
        };
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Date,
            &options,
        );
        assert_eq!(path, dest().join("2024-03-05").join("2024-03-05_003.JPG"));
    }

    #[test]
    fn test_rename_all_tokens() {
        let options = NamingOptions {
            label: Some("Smith Wedding"),
            rename_enabled: true,
            rename_pattern: Some("{year}{month}{day}-{label}-{original}-{seq}"),
            sequence: 42,
        };
        let path = destination_path(
            &dest(),
            &media("DSC_9.NEF"),
            OrganizationScheme::Flat,
            &options,
        );
        assert_eq!(
            path,
            dest().join("Smith Wedding").join("20240305-Smith Wedding-DSC_9-042.NEF")
        );
    }

    #[test]
    fn test_rename_pattern_ignored_when_disabled() {
        let options = NamingOptions {
            rename_enabled: false,
            rename_pattern: Some("{date}_{seq}"),
            sequence: 1,
            ..Default::default()
        };
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Date,
            &options,
        );
        assert_eq!(path.file_name().unwrap(), "IMG_0001.JPG");
    }

    #[test]
    fn test_label_is_sanitized_and_appended() {
        let options = NamingOptions {
            label: Some("  a/b:c*d  "),
            ..Default::default()
        };
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Date,
            &options,
        );
        assert_eq!(path, dest().join("2024-03-05_a_b_c_d").join("IMG_0001.JPG"));

        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::YearMonth,
            &options,
        );
        assert_eq!(path, dest().join("2024").join("03_a_b_c_d").join("IMG_0001.JPG"));
    }

    #[test]
    fn test_blank_label_is_ignored() {
        let options = NamingOptions {
            label: Some("   "),
            ..Default::default()
        };
        let path = destination_path(
            &dest(),
            &media("IMG_0001.JPG"),
            OrganizationScheme::Flat,
            &options,
        );
        assert_eq!(path, dest().join("IMG_0001.JPG"));
    }

    #[test]
    fn test_deterministic() {
        let file = media("IMG_0001.JPG");
        let options = NamingOptions {
            label: Some("Trip"),
            rename_enabled: true,
            rename_pattern: Some("{original}_{seq}"),
            sequence: 7,
        };
        let first = destination_path(&dest(), &file, OrganizationScheme::YearMonth, &options);
        for _ in 0..10 {
            let again = destination_path(&dest(), &file, OrganizationScheme::YearMonth, &options);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label(r#"a\b"c<d>e|f?"#), "a_b_c_d_e_f_");
    }
}
