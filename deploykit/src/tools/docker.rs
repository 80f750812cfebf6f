//! Image registry backed by the `docker` CLI.

use super::{ExecEnv, ToolCommand};
use crate::clients::{BuildContext, ImageRef, ImageRegistry};
use crate::config::RegistryCredentials;
use crate::errors::Result;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::info;

/// Drives `docker build`, `docker login` and `docker push`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    env: ExecEnv,
}

impl DockerCli {
    /// Creates a client running `docker` under `env`.
    #[must_use]
    pub fn new(env: ExecEnv) -> Self {
        Self {
            program: "docker".to_string(),
            env,
        }
    }

    /// Overrides the program name.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn build_command(&self, context: &BuildContext, image: &ImageRef) -> ToolCommand {
        let mut command = ToolCommand::new(&self.program, "build")
            .args(["build", "--quiet", "--platform"])
            .arg(&context.platform)
            .arg("--file")
            .arg(&context.dockerfile)
            .arg("--tag")
            .arg(image.to_string());
        for tag in &context.extra_tags {
            command = command.arg("--tag").arg(image.retagged(tag).to_string());
        }
        for (key, value) in &context.labels {
            command = command.arg("--label").arg(format!("{key}={value}"));
        }
        for (key, value) in &context.build_args {
            command = command.arg("--build-arg").arg(format!("{key}={value}"));
        }
        command.arg(&context.context_dir)
    }
}

#[async_trait]
impl ImageRegistry for DockerCli {
    async fn build(&self, context: &BuildContext, image: &ImageRef) -> Result<ImageRef> {
        info!(image = %image, platform = %context.platform, "building image");
        let output = self.build_command(context, image).run(&self.env).await?;
        let image_id = output
            .stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        Ok(match image_id {
            Some(id) => image.clone().with_image_id(id),
            None => image.clone(),
        })
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<()> {
        ToolCommand::new(&self.program, "login")
            .args(["login", credentials.server.as_str(), "--username"])
            .arg(&credentials.username)
            .arg("--password-stdin")
            .with_stdin(credentials.password.expose_secret().as_bytes())
            .run(&self.env)
            .await?;
        info!(server = %credentials.server, user = %credentials.username, "registry login succeeded");
        Ok(())
    }

    async fn push(&self, image: &ImageRef) -> Result<()> {
        ToolCommand::new(&self.program, "push")
            .arg("push")
            .arg(image.to_string())
            .run(&self.env)
            .await?;
        info!(image = %image, "pushed image");
        Ok(())
    }
}
