//! Static table of supported script languages.

/// How one language is run: the image used when the job names none, the
/// fixed program arguments, and the file suffix the language tooling expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    pub key: &'static str,
    pub default_image: &'static str,
    pub program: &'static [&'static str],
    pub extension: &'static str,
}

/// Base name of the staged script inside the container.
pub const SCRIPT_BASENAME: &str = "job_script";

const LANGUAGES: &[LanguageProfile] = &[
    LanguageProfile {
        key: "python",
        default_image: "python:3.10",
        program: &["python"],
        extension: ".py",
    },
    LanguageProfile {
        key: "ruby",
        default_image: "ruby:3.2",
        program: &["ruby"],
        extension: ".rb",
    },
    LanguageProfile {
        key: "go",
        default_image: "golang:1.23.4",
        program: &["go", "run"],
        extension: ".go",
    },
    LanguageProfile {
        key: "node",
        default_image: "node:16.11",
        program: &["node"],
        extension: ".js",
    },
];

pub fn lookup(language: &str) -> Option<&'static LanguageProfile> {
    LANGUAGES.iter().find(|profile| profile.key == language)
}

pub fn supported_languages() -> impl Iterator<Item = &'static str> {
    LANGUAGES.iter().map(|profile| profile.key)
}

impl LanguageProfile {
    /// Path the staged script is mounted at, e.g. `/tmp/job_script.py`.
    pub fn mount_path(&self, mount_dir: &str) -> String {
        format!(
            "{}/{}{}",
            mount_dir.trim_end_matches('/'),
            SCRIPT_BASENAME,
            self.extension
        )
    }

    /// Container argv: the fixed program arguments followed by the mount path.
    ///
    /// Script content never appears here; it only reaches the container
    /// through the mounted file.
    pub fn argv(&self, mount_dir: &str) -> Vec<String> {
        self.program
            .iter()
            .map(|part| part.to_string())
            .chain(std::iter::once(self.mount_path(mount_dir)))
            .collect()
    }
}
