//! Individual patch routines and the file helpers they share

use std::fs;
use std::path::Path;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::gate::PatchSettings;
use super::PatchContext;
use crate::error::{PitError, PitResult};

pub(super) type Routine = fn(&PatchSettings, &mut PatchContext) -> PitResult<()>;

const LAUNCH_BROWSER: &str = "vaadin.launch-browser";
const PRERELEASE_REPO_URL: &str = "https://maven.vaadin.com/vaadin-prereleases";
const SPREADSHEET_LICENSE: &str = "vaadin.spreadsheet.developer.license";
const APP_PROPERTIES: &str = "src/main/resources/application.properties";

/// Versions served from the pre-release repository
pub fn is_prerelease(version: &str) -> bool {
    ["alpha", "beta", "rc", "SNAP"].iter().any(|m| version.contains(m))
}

fn is_property_line(line: &str, key: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix(key)
        .map(|rest| rest.trim_start().starts_with('=') || rest.trim_start().starts_with(':'))
        .unwrap_or(false)
}

/// Drop every `key=`/`key:` line from a properties file. Returns whether
/// anything was removed.
pub fn remove_property(path: &Path, key: &str) -> PitResult<bool> {
    let content = fs::read_to_string(path)?;
    let kept: Vec<&str> = content.lines().filter(|l| !is_property_line(l, key)).collect();
    if kept.len() == content.lines().count() {
        return Ok(false);
    }
    let mut out = kept.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(true)
}

/// Set `key=value` in a properties file, replacing an existing entry or
/// appending one. The file is created when missing.
pub fn set_property(path: &Path, key: &str, value: &str) -> PitResult<()> {
    let content = if path.exists() {
        fs::read_to_string(path)?
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        String::new()
    };

    let entry = format!("{}={}", key, value);
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|l| {
            if is_property_line(l, key) {
                replaced = true;
                entry.clone()
            } else {
                l.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }
    fs::write(path, lines.join("\n") + "\n")?;
    Ok(())
}

/// Add `entry` inside the first `<tag>` block, creating the block before
/// `</project>` when the pom has none.
fn insert_into_block(content: &str, tag: &str, entry: &str) -> String {
    let open = format!("<{}>", tag);
    if let Some(idx) = content.find(&open) {
        let at = idx + open.len();
        format!("{}\n{}{}", &content[..at], entry, &content[at..])
    } else if let Some(idx) = content.rfind("</project>") {
        format!(
            "{}  <{}>\n{}  </{}>\n{}",
            &content[..idx],
            tag,
            entry,
            tag,
            &content[idx..]
        )
    } else {
        content.to_string()
    }
}

pub(super) fn disable_launch_browser(_: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let src = ctx.project_file("src");
    if !src.is_dir() {
        return Ok(());
    }
    let files: Vec<_> = WalkDir::new(&src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.file_name() == "application.properties")
        .map(|e| e.into_path())
        .collect();

    for file in files {
        let content = fs::read_to_string(&file)?;
        if !content.lines().any(|l| is_property_line(l, LAUNCH_BROWSER)) {
            continue;
        }
        ctx.backup_file(&file)?;
        remove_property(&file, LAUNCH_BROWSER)?;
        debug!("Removed {} from {}", LAUNCH_BROWSER, file.display());
    }
    Ok(())
}

pub(super) fn set_target_version(_: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let version = ctx.version.clone();
    let pom = ctx.project_file("pom.xml");
    let gradle_props = ctx.project_file("gradle.properties");

    if pom.exists() {
        let content = fs::read_to_string(&pom)?;
        let re = Regex::new(r"<vaadin\.version>[^<]*</vaadin\.version>")?;
        if re.is_match(&content) {
            ctx.backup_file(&pom)?;
            let updated = re.replace_all(&content, format!("<vaadin.version>{}</vaadin.version>", version));
            fs::write(&pom, updated.as_bytes())?;
            info!("Set vaadin.version to {} in pom.xml", version);
            return Ok(());
        }
    }
    if gradle_props.exists() {
        ctx.backup_file(&gradle_props)?;
        set_property(&gradle_props, "vaadinVersion", &version)?;
        info!("Set vaadinVersion to {} in gradle.properties", version);
        return Ok(());
    }
    warn!("No version property found in {}, building as is", ctx.project_path.display());
    Ok(())
}

pub(super) fn add_prerelease_repositories(_: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let pom = ctx.project_file("pom.xml");
    if !pom.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(&pom)?;
    if content.contains(PRERELEASE_REPO_URL) {
        return Ok(());
    }

    let repo = format!(
        "    <repository>\n      <id>vaadin-prereleases</id>\n      <url>{}</url>\n    </repository>\n",
        PRERELEASE_REPO_URL
    );
    let plugin_repo = format!(
        "    <pluginRepository>\n      <id>vaadin-prereleases</id>\n      <url>{}</url>\n    </pluginRepository>\n",
        PRERELEASE_REPO_URL
    );
    let updated = insert_into_block(&content, "repositories", &repo);
    let updated = insert_into_block(&updated, "pluginRepositories", &plugin_repo);

    ctx.backup_file(&pom)?;
    fs::write(&pom, updated)?;
    info!("Added pre-release repositories to pom.xml");
    Ok(())
}

pub(super) fn configure_github_token(settings: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let token = settings.github_token.clone().ok_or_else(|| {
        PitError::Configuration(format!(
            "{} needs a GitHub token: set GHTK or pass --ghtk",
            ctx.app_name
        ))
    })?;
    let props = ctx.project_file(APP_PROPERTIES);
    ctx.backup_file(&props)?;
    set_property(&props, "github.personal.token", &token)?;
    Ok(())
}

pub(super) fn require_openai_token(settings: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    if settings.var("OPENAI_TOKEN").is_none() {
        return Err(PitError::Configuration(format!(
            "{} needs the OPENAI_TOKEN env var",
            ctx.app_name
        )));
    }
    Ok(())
}

pub(super) fn require_spreadsheet_license(settings: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let license = settings.home.join(SPREADSHEET_LICENSE);
    if !license.exists() {
        return Err(PitError::Configuration(format!(
            "{} needs a license file at {}",
            ctx.app_name,
            license.display()
        )));
    }
    Ok(())
}

pub(super) fn remove_pro_key(settings: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let pro_key = settings.pro_key();
    if !pro_key.exists() {
        return Ok(());
    }
    let aside = pro_key.with_file_name(format!("proKey-{}", std::process::id()));
    warn!("Removing proKey license");
    ctx.move_aside(&pro_key, &aside)
}

pub(super) fn select_jdk(settings: &PatchSettings, ctx: &mut PatchContext) -> PitResult<()> {
    let Some(jdk) = ctx.jdk else {
        return Ok(());
    };
    let x64 = format!("JAVA_HOME_{}_X64", jdk);
    let plain = format!("JAVA_HOME_{}", jdk);
    let java_home = settings
        .var(&x64)
        .or_else(|| settings.var(&plain))
        .map(str::to_string)
        .ok_or_else(|| {
            PitError::Configuration(format!("JDK {} requested but neither {} nor {} is set", jdk, x64, plain))
        })?;

    let path = settings.var("PATH").unwrap_or("/usr/local/bin:/usr/bin:/bin");
    ctx.set_env("PATH", format!("{}/bin:{}", java_home, path));
    ctx.set_env("JAVA_HOME", java_home.clone());
    info!("Using JDK {} from {}", jdk, java_home);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("24.9.0.alpha3" => true)]
    #[test_case("25.0.0.beta1" => true)]
    #[test_case("24.8.0.rc2" => true)]
    #[test_case("25.0-SNAPSHOT" => true)]
    #[test_case("24.9.2" => false)]
    #[test_case("current" => false)]
    fn test_is_prerelease(version: &str) -> bool {
        is_prerelease(version)
    }

    #[test]
    fn test_remove_property_handles_both_separators() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("application.properties");
        fs::write(
            &file,
            "server.port=8080\nvaadin.launch-browser=true\nvaadin.launch-browser: true\nlogging.level=INFO\n",
        )
        .unwrap();

        assert!(remove_property(&file, LAUNCH_BROWSER).unwrap());
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "server.port=8080\nlogging.level=INFO\n"
        );
        assert!(!remove_property(&file, LAUNCH_BROWSER).unwrap());
    }

    #[test]
    fn test_set_property_replaces_or_appends() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("resources").join("application.properties");

        set_property(&file, "github.personal.token", "abc").unwrap();
        set_property(&file, "server.port", "8080").unwrap();
        set_property(&file, "github.personal.token", "xyz").unwrap();

        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "github.personal.token=xyz\nserver.port=8080\n"
        );
    }

    #[test]
    fn test_property_prefix_is_not_a_match() {
        assert!(!is_property_line("vaadin.launch-browser-delay=3", LAUNCH_BROWSER));
        assert!(is_property_line("  vaadin.launch-browser = false", LAUNCH_BROWSER));
    }

    #[test]
    fn test_insert_into_existing_block() {
        let pom = "<project>\n  <repositories>\n    <repository><id>a</id></repository>\n  </repositories>\n</project>\n";
        let out = insert_into_block(pom, "repositories", "    <repository><id>b</id></repository>\n");
        assert_eq!(out.matches("<repositories>").count(), 1);
        assert!(out.contains("<id>b</id>"));
    }

    #[test]
    fn test_insert_creates_block() {
        let pom = "<project>\n  <modelVersion>4.0.0</modelVersion>\n</project>\n";
        let out = insert_into_block(pom, "pluginRepositories", "    <pluginRepository/>\n");
        assert!(out.contains("<pluginRepositories>\n    <pluginRepository/>\n  </pluginRepositories>\n</project>"));
    }
}
