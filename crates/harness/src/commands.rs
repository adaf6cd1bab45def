//! Build and run commands for a prepared project

use std::path::Path;

use serde::Serialize;

use crate::catalog::Variant;
use crate::config::{Mode, PitConfig};

/// Startup messages that mark a dev server as started
pub const DEV_STARTUP_MESSAGES: &str =
    "Started .*Application|Frontend compiled|Started ServerConnector|Started Vite|Listening on:";
/// Startup messages that mark a production server as started
pub const PROD_STARTUP_MESSAGES: &str = "Started .*Application|Started ServerConnector|Listening on:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    Maven,
    Gradle,
}

impl BuildTool {
    pub fn detect(variant: &Variant, project: &Path) -> Self {
        let has_pom = project.join("pom.xml").exists();
        let has_gradle =
            project.join("build.gradle").exists() || project.join("build.gradle.kts").exists();
        if variant.base.contains("gradle") || (has_gradle && !has_pom) {
            BuildTool::Gradle
        } else {
            BuildTool::Maven
        }
    }
}

/// Flags that influence the generated commands
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub port: u16,
    pub offline: bool,
    pub pnpm: bool,
    pub vite: bool,
}

impl From<&PitConfig> for CommandOptions {
    fn from(config: &PitConfig) -> Self {
        Self {
            port: config.port,
            offline: config.offline,
            pnpm: config.pnpm,
            vite: config.vite,
        }
    }
}

/// Commands and startup signal for one (variant, mode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCommands {
    pub tool: BuildTool,
    /// Run to completion before starting; non-zero exit fails the validation
    pub compile: String,
    /// Long-running server command
    pub run: String,
    /// Regex that marks the server as started in its output
    pub check_message: String,
}

impl BuildCommands {
    pub fn derive(variant: &Variant, mode: Mode, project: &Path, options: &CommandOptions) -> Self {
        let tool = BuildTool::detect(variant, project);
        let mvn = maven(project, options);
        let gradle = gradle(project, options);
        let name = variant.base.as_str();
        let port = options.port;
        let jetty = name == "archetype-hotswap" || name == "archetype-jetty";
        let quarkus = name == "vaadin-quarkus" || name.contains("quarkus");

        match mode {
            Mode::Dev => {
                let compile = match tool {
                    BuildTool::Gradle => format!("{} clean", gradle),
                    BuildTool::Maven => format!("{} clean", mvn),
                };
                let mut run = if quarkus && tool == BuildTool::Maven {
                    format!("{} quarkus:dev -Dquarkus.http.port={}", mvn, port)
                } else if jetty {
                    format!("{} jetty:run -Djetty.http.port={}", mvn, port)
                } else if tool == BuildTool::Gradle {
                    format!("{} bootRun --args=\"--server.port={}\"", gradle, port)
                } else if variant.is_initializer() {
                    format!(
                        "{} spring-boot:run -Dspring-boot.run.arguments=\"--server.port={}\"",
                        mvn, port
                    )
                } else {
                    mvn.clone()
                };
                if options.pnpm && tool == BuildTool::Maven {
                    run.push_str(" -Dpnpm.enable=true");
                }
                if options.vite && tool == BuildTool::Maven {
                    run.push_str(" -Dvaadin.frontend.hotdeploy=true");
                }
                Self {
                    tool,
                    compile,
                    run,
                    check_message: DEV_STARTUP_MESSAGES.to_string(),
                }
            }
            Mode::Prod => {
                let compile = if jetty {
                    format!("{} clean", mvn)
                } else if tool == BuildTool::Gradle {
                    format!(
                        "{} clean build -Dhilla.productionMode -Dvaadin.productionMode && rm -f ./build/libs/*-plain.jar",
                        gradle
                    )
                } else {
                    let mut cmd = format!("{} -Pproduction clean package", mvn);
                    if options.pnpm {
                        cmd.push_str(" -Dpnpm.enable=true");
                    }
                    cmd.push_str(" -Dmaven.compiler.showDeprecation");
                    cmd
                };
                let run = if jetty {
                    format!(
                        "{} -Pproduction -Dvaadin.productionMode -Djetty.http.port={} jetty:run-war",
                        mvn, port
                    )
                } else if quarkus {
                    format!("java -Dquarkus.http.port={} -jar target/quarkus-app/quarkus-run.jar", port)
                } else if tool == BuildTool::Gradle {
                    format!("java -Dserver.port={} -jar ./build/libs/*.jar", port)
                } else {
                    format!("java -Dvaadin.productionMode -Dserver.port={} -jar target/*.jar", port)
                };
                Self {
                    tool,
                    compile,
                    run,
                    check_message: PROD_STARTUP_MESSAGES.to_string(),
                }
            }
        }
    }
}

fn maven(project: &Path, options: &CommandOptions) -> String {
    let bin = if project.join("mvnw").exists() { "./mvnw" } else { "mvn" };
    let mut cmd = format!("{} -ntp -B", bin);
    if options.offline {
        cmd.push_str(" -o");
    }
    cmd
}

fn gradle(project: &Path, options: &CommandOptions) -> String {
    let bin = if project.join("gradlew").exists() { "./gradlew" } else { "gradle" };
    let mut cmd = format!("{} -Porg.gradle.java.installations.auto-detect=false", bin);
    if options.offline {
        cmd.push_str(" --offline");
    }
    cmd
}
