//! Project preparation - generating presets and checking out demos

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::catalog::Variant;
use crate::config::PitConfig;
use crate::error::{PitError, PitResult};
use crate::process::{ProcessSupervisor, SpawnOptions};

const INITIALIZER_GROUP: &str = "com.vaadin.initializer";
const INITIALIZER_BOOT_VERSION: &str = "3.4.3";
const INITIALIZER_JAVA_VERSION: &str = "17";

/// Produces a buildable project directory for a variant
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn prepare(&self, variant: &Variant) -> PitResult<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct ProjectOptions {
    pub work_dir: PathBuf,
    pub offline: bool,
    pub git_ssh: bool,
    pub dry_run: bool,
    pub show_output: bool,
}

impl From<&PitConfig> for ProjectOptions {
    fn from(config: &PitConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            offline: config.offline,
            git_ssh: config.git_ssh,
            dry_run: config.dry_run,
            show_output: config.verbose,
        }
    }
}

/// Prepares projects with curl, unzip, git, mvn and npx run through the
/// process registry
pub struct ShellProjectSource {
    processes: Arc<dyn ProcessSupervisor>,
    options: ProjectOptions,
}

impl ShellProjectSource {
    pub fn new(processes: Arc<dyn ProcessSupervisor>, options: ProjectOptions) -> Self {
        Self { processes, options }
    }

    /// Commands run in the work dir to create the project
    pub fn generation_commands(&self, variant: &Variant) -> Vec<String> {
        let folder = variant.folder();
        if variant.is_demo() {
            return vec![self.clone_command(variant, &folder)];
        }

        let name = variant.base.as_str();
        let command = match name {
            "archetype-spring" => format!(
                "mvn -ntp -q -B archetype:generate -DarchetypeGroupId=com.vaadin \
                 -DarchetypeArtifactId=vaadin-archetype-spring-application -DarchetypeVersion=LATEST \
                 -DgroupId=com.vaadin.starter -DartifactId={}",
                folder
            ),
            n if n.starts_with("archetype") => format!(
                "mvn -ntp -q -B archetype:generate -DarchetypeGroupId=com.vaadin \
                 -DarchetypeArtifactId=vaadin-archetype-application -DarchetypeVersion=LATEST \
                 -DgroupId=com.vaadin.starter -DartifactId={}",
                folder
            ),
            "vaadin-quarkus" => format!(
                "mvn -ntp -q -B io.quarkus.platform:quarkus-maven-plugin:create -Dextensions=vaadin \
                 -DwithCodestart -DprojectGroupId=com.vaadin.starter -DprojectArtifactId={}",
                folder
            ),
            "hilla-react-cli" => format!("npx @hilla/cli init --react {}", folder),
            n if n.starts_with("initializer") => {
                let project_type = if n.contains("-gradle-") {
                    "gradle-project"
                } else {
                    "maven-project"
                };
                let url = format!(
                    "https://start.spring.io/starter.zip?type={t}&language=java&bootVersion={b}\
                     &baseDir={f}&groupId={g}&artifactId={f}&name={f}&description={f}\
                     &packageName={g}&packaging=jar&javaVersion={j}&dependencies=vaadin,devtools",
                    t = project_type,
                    b = INITIALIZER_BOOT_VERSION,
                    f = folder,
                    g = INITIALIZER_GROUP,
                    j = INITIALIZER_JAVA_VERSION,
                );
                download_and_unzip(&url, &folder)
            }
            _ => {
                let presets: Vec<String> = variant.presets.iter().map(|p| format!("preset={}", p)).collect();
                let url = format!(
                    "https://start.vaadin.com/dl?{}&projectName={}",
                    presets.join("&"),
                    folder
                );
                download_and_unzip(&url, &folder)
            }
        };
        vec![command]
    }

    fn clone_command(&self, variant: &Variant, folder: &str) -> String {
        let repo = variant.repository.as_deref().unwrap_or(&variant.base);
        let url = if self.options.git_ssh {
            format!("git@github.com:{}.git", repo)
        } else {
            format!("https://github.com/{}.git", repo)
        };
        let mut cmd = format!("git clone -q {} {}", url, folder);
        if let Some(branch) = variant.branch.as_deref().filter(|b| *b != "main" && *b != "master") {
            cmd.push_str(&format!(" --branch {}", branch));
        }
        cmd
    }

    async fn run_step(&self, variant: &Variant, command: &str, cwd: &Path) -> PitResult<()> {
        debug!("{}", command);
        let mut options = SpawnOptions::with_id(format!("{}-setup", variant.folder())).cwd(cwd);
        options.show_output = self.options.show_output;
        let code = self.processes.run(command, options).await?;
        if code != Some(0) {
            return Err(PitError::ProjectSetup(format!(
                "'{}' exited with {:?} while preparing {}",
                command, code, variant
            )));
        }
        Ok(())
    }

    /// Fresh repository with everything committed, so patches show up as diffs
    async fn init_git(&self, variant: &Variant, dir: &Path) -> PitResult<()> {
        if dir.join(".git").exists() {
            return Ok(());
        }
        for command in [
            "git init -q",
            "git config advice.addIgnoredFile false",
            "git add -A",
            "git -c user.name='Vaadin Bot' -c user.email='vaadin-bot@vaadin.com' commit -q -m 'First commit'",
        ] {
            self.run_step(variant, command, dir).await?;
        }
        Ok(())
    }
}

fn download_and_unzip(url: &str, folder: &str) -> String {
    format!(
        "curl -s -f '{url}' -o '{folder}.zip' && unzip -q '{folder}.zip' && rm -f '{folder}.zip'",
        url = url,
        folder = folder
    )
}

#[async_trait]
impl ProjectSource for ShellProjectSource {
    async fn prepare(&self, variant: &Variant) -> PitResult<PathBuf> {
        let work_dir = &self.options.work_dir;
        let checkout = work_dir.join(variant.folder());
        let project = variant.project_dir(work_dir);

        if self.options.offline && project.exists() {
            info!("Offline: reusing {}", project.display());
            return Ok(project);
        }

        let commands = self.generation_commands(variant);
        if self.options.dry_run {
            for command in &commands {
                info!("Would run in {}: {}", work_dir.display(), command);
            }
            return Ok(project);
        }

        std::fs::create_dir_all(work_dir)?;
        if checkout.exists() {
            debug!("Removing previous {}", checkout.display());
            std::fs::remove_dir_all(&checkout)?;
        }

        info!("Preparing {} in {}", variant, checkout.display());
        for command in &commands {
            self.run_step(variant, command, work_dir).await?;
        }

        if !project.is_dir() {
            return Err(PitError::ProjectSetup(format!(
                "{} not found after preparing {}",
                project.display(),
                variant
            )));
        }
        if !variant.is_demo() {
            self.init_git(variant, &checkout).await?;
        }
        Ok(project)
    }
}
