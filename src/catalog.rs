//! Category -> Pipeline table
//!
//! Per-distro differences (build directory, artifact, executable name,
//! version folder, build-image archive) live in one static table. A single
//! pipeline template consumes a `DistroProfile` and a `Layout`, so there is no
//! if/else on distro names anywhere else.

use crate::error::{Result, UpdaterError};
use crate::pipeline::{Pipeline, ReadPoint, Step, VersionRead};
use crate::types::Category;
use std::path::{Path, PathBuf};

/// Upstream repository holding the tool sources
pub const DEFAULT_REPO_URL: &str =
    "https://github.com/claudemods/claudemods-multi-iso-konsole-script.git";

/// Reported when the installed version marker is missing
pub const NOT_INSTALLED: &str = "not installed";
/// Reported when a downloaded version marker is missing
pub const UNKNOWN_VERSION: &str = "unknown";

/// Source subdirectory (inside the checkout) that holds the tool family
const TOOL_ROOT: &str = "advancedcscript";
const VERSION_FILE: &str = "version.txt";

/// Static per-category facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistroProfile {
    pub category: Category,
    /// Build directory relative to the tool root
    pub build_dir: &'static str,
    /// File produced by `make` inside `build_dir`
    pub artifact: &'static str,
    /// Name installed into the binary directory
    pub executable: &'static str,
    /// Folder under `version/` holding this distro's version marker
    pub version_dir: &'static str,
    /// Archive under `buildimages/` extracted into the config directory
    pub image_archive: &'static str,
}

pub const PROFILES: &[DistroProfile] = &[
    DistroProfile {
        category: Category::ArchLike,
        build_dir: "arch",
        artifact: "archisocreator.bin",
        executable: "archisocreator",
        version_dir: "arch",
        image_archive: "build-image-arch.zip",
    },
    DistroProfile {
        category: Category::Ubuntu,
        build_dir: "ubuntu/noble",
        artifact: "ubuntuisocreator.bin",
        executable: "ubuntuisocreator",
        version_dir: "ubuntu",
        image_archive: "build-image-ubuntu.zip",
    },
    DistroProfile {
        category: Category::Debian,
        build_dir: "debian/bookworm",
        artifact: "debianisocreator.bin",
        executable: "debianisocreator",
        version_dir: "debian",
        image_archive: "build-image-debian.zip",
    },
];

/// Look up the profile for a category. `Unknown` has none.
pub fn profile_for(category: Category) -> Option<&'static DistroProfile> {
    PROFILES.iter().find(|p| p.category == category)
}

/// Filesystem locations the pipeline touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub repo_url: String,
    /// Where the repository is cloned (removed again by `cleanup`)
    pub checkout_dir: PathBuf,
    /// Configuration directory holding the version marker and build images
    pub config_dir: PathBuf,
    /// Directory the executable is installed into
    pub bin_dir: PathBuf,
}

impl Layout {
    /// Layout rooted at `home`
    pub fn for_home(home: &Path) -> Self {
        Self {
            repo_url: DEFAULT_REPO_URL.to_string(),
            checkout_dir: home.join("claudemods-multi-iso-konsole-script"),
            config_dir: home.join(".config").join("cmi"),
            bin_dir: PathBuf::from("/usr/bin"),
        }
    }

    /// Installed version marker
    pub fn installed_version_file(&self) -> PathBuf {
        self.config_dir.join(VERSION_FILE)
    }

    /// Version marker inside the fresh checkout
    pub fn downloaded_version_file(&self, profile: &DistroProfile) -> PathBuf {
        version_file_in(&self.checkout_dir, profile)
    }

    /// Final location of the installed executable
    pub fn executable_path(&self, profile: &DistroProfile) -> PathBuf {
        self.bin_dir.join(profile.executable)
    }

    fn build_dir(&self, profile: &DistroProfile) -> PathBuf {
        self.checkout_dir.join(TOOL_ROOT).join(profile.build_dir)
    }

    fn image_archive(&self, profile: &DistroProfile) -> PathBuf {
        self.checkout_dir
            .join(TOOL_ROOT)
            .join("buildimages")
            .join(profile.image_archive)
    }
}

/// Like [`profile_for`], but an unsupported category is a configuration error
pub fn require_profile(category: Category) -> Result<&'static DistroProfile> {
    profile_for(category).ok_or_else(|| {
        UpdaterError::configuration(format!(
            "unsupported distribution '{}': only Arch Linux, CachyOS, Ubuntu and Debian are supported",
            category
        ))
    })
}

/// Build the update pipeline for `category`.
///
/// # Errors
///
/// `Configuration` if the category has no profile.
pub fn pipeline_for(category: Category, layout: &Layout) -> Result<Pipeline> {
    Ok(build_pipeline(require_profile(category)?, layout))
}

fn build_pipeline(profile: &DistroProfile, layout: &Layout) -> Pipeline {
    let checkout = quote_path(&layout.checkout_dir);
    let config_dir = quote_path(&layout.config_dir);
    let executable = quote_path(&layout.executable_path(profile));

    Pipeline::new()
        .require_known_category()
        // A run aborted before `cleanup` leaves the checkout behind
        .step(Step::new("remove-stale-checkout", format!("rm -rf {}", checkout)).non_critical())
        .step(Step::new(
            "clone",
            format!("git clone {} {}", shell_escape(&layout.repo_url), checkout),
        ))
        .step(Step::new("remove-old-binary", format!("rm -f {}", executable)).privileged().non_critical())
        .step(Step::new("remove-old-config", format!("rm -rf {}", config_dir)).privileged().non_critical())
        .step(Step::new("create-config-dir", format!("mkdir -p {}", config_dir)))
        .step(Step::new(
            "build",
            format!("cd {} && make", quote_path(&layout.build_dir(profile))),
        ))
        .step(
            Step::new(
                "install-binary",
                format!(
                    "cp -f {} {}",
                    quote_path(&layout.build_dir(profile).join(profile.artifact)),
                    executable
                ),
            )
            .privileged(),
        )
        .step(
            Step::new(
                "install-version",
                format!(
                    "cp {} {}",
                    quote_path(&layout.downloaded_version_file(profile)),
                    quote_path(&layout.installed_version_file())
                ),
            )
            .non_critical(),
        )
        .step(
            Step::new(
                "extract-images",
                format!(
                    "unzip -o {} -d {}",
                    quote_path(&layout.image_archive(profile)),
                    config_dir
                ),
            )
            .privileged()
            .non_critical(),
        )
        .step(Step::new("cleanup", format!("rm -rf {}", checkout)).non_critical())
        .version_read(VersionRead::new(
            "current",
            layout.installed_version_file(),
            NOT_INSTALLED,
            ReadPoint::BeforeRun,
        ))
        .version_read(VersionRead::new(
            "downloaded",
            layout.downloaded_version_file(profile),
            UNKNOWN_VERSION,
            ReadPoint::AfterStep("clone".to_string()),
        ))
        .version_read(VersionRead::new(
            "installed",
            layout.installed_version_file(),
            NOT_INSTALLED,
            ReadPoint::AfterRun,
        ))
}

/// Version marker of `profile` inside a checkout rooted at `root`
pub fn version_file_in(root: &Path, profile: &DistroProfile) -> PathBuf {
    root.join(TOOL_ROOT)
        .join("version")
        .join(profile.version_dir)
        .join(VERSION_FILE)
}

/// Shallow clone of the sources into `target`, used to read the available
/// version without touching the real checkout
pub fn shallow_clone_command(layout: &Layout, target: &Path) -> String {
    format!(
        "git clone --depth 1 --quiet {} {}",
        shell_escape(&layout.repo_url),
        quote_path(target)
    )
}

fn quote_path(path: &Path) -> String {
    shell_escape(&path.to_string_lossy())
}

/// Escape a single shell word for POSIX sh.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn layout() -> Layout {
        Layout::for_home(Path::new("/home/tester"))
    }

    #[test]
    fn test_every_known_category_has_profile() {
        for category in Category::iter() {
            assert_eq!(profile_for(category).is_some(), category.is_known(), "{category}");
        }
    }

    #[test]
    fn test_unknown_category_is_configuration_error() {
        let err = pipeline_for(Category::Unknown, &layout()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_pipeline_step_order_and_flags() {
        let pipeline = pipeline_for(Category::ArchLike, &layout()).expect("arch pipeline");
        let summary: Vec<(&str, bool, bool)> = pipeline
            .steps()
            .iter()
            .map(|s| (s.name.as_str(), s.privileged, s.critical))
            .collect();
        assert_eq!(
            summary,
            [
                ("remove-stale-checkout", false, false),
                ("clone", false, true),
                ("remove-old-binary", true, false),
                ("remove-old-config", true, false),
                ("create-config-dir", false, true),
                ("build", false, true),
                ("install-binary", true, true),
                ("install-version", false, false),
                ("extract-images", true, false),
                ("cleanup", false, false),
            ]
        );
        assert!(pipeline.requires_known_category());
    }

    #[test]
    fn test_profile_paths_flow_into_commands() {
        let pipeline = pipeline_for(Category::Debian, &layout()).expect("debian pipeline");
        let build = &pipeline.steps()[5];
        assert_eq!(
            build.command,
            "cd /home/tester/claudemods-multi-iso-konsole-script/advancedcscript/debian/bookworm && make"
        );
        let install = &pipeline.steps()[6];
        assert!(install.command.ends_with("/usr/bin/debianisocreator"));
    }

    #[test]
    fn test_version_reads() {
        let pipeline = pipeline_for(Category::Ubuntu, &layout()).expect("ubuntu pipeline");
        let labels: Vec<&str> = pipeline.version_reads().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["current", "downloaded", "installed"]);
        assert_eq!(
            pipeline.version_reads()[1].path,
            PathBuf::from(
                "/home/tester/claudemods-multi-iso-konsole-script/advancedcscript/version/ubuntu/version.txt"
            )
        );
        assert_eq!(pipeline.version_reads()[0].sentinel, NOT_INSTALLED);
    }

    #[test]
    fn test_paths_with_spaces_are_quoted() {
        let layout = Layout::for_home(Path::new("/home/jo smith"));
        let pipeline = pipeline_for(Category::ArchLike, &layout).expect("arch pipeline");
        let cleanup = pipeline.steps().last().expect("cleanup step");
        assert_eq!(
            cleanup.command,
            "rm -rf '/home/jo smith/claudemods-multi-iso-konsole-script'"
        );
    }

    #[test]
    fn test_stale_checkout_removed_before_clone() {
        let pipeline = pipeline_for(Category::ArchLike, &layout()).expect("arch pipeline");
        let steps = pipeline.steps();
        assert_eq!(steps[0].command, steps.last().expect("cleanup").command);
        assert!(steps[0].command.starts_with("rm -rf "));
        assert_eq!(steps[1].name, "clone");
    }

    #[test]
    fn test_shallow_clone_command() {
        let command = shallow_clone_command(&layout(), Path::new("/tmp/scratch dir/src"));
        assert_eq!(
            command,
            format!("git clone --depth 1 --quiet {} '/tmp/scratch dir/src'", DEFAULT_REPO_URL)
        );
        let profile = profile_for(Category::Debian).expect("debian profile");
        assert_eq!(
            version_file_in(Path::new("/tmp/x"), profile),
            PathBuf::from("/tmp/x/advancedcscript/version/debian/version.txt")
        );
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("/usr/bin"), "/usr/bin");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_escape("$(reboot)"), "'$(reboot)'");
    }
}
