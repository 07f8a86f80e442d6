use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use crowdgate_core::accounts::{LoginRequest, ProfileUpdate, RegisterRequest, SocialProvider, Upload};
use crowdgate_core::api::PendingRequest;
use crowdgate_core::auth::{IdentityEvent, Navigator};
use crowdgate_core::{AccountsApi, ApiClient};
use reqwest::Method;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Google,
    Facebook,
}

impl From<Provider> for SocialProvider {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Google => SocialProvider::Google,
            Provider::Facebook => SocialProvider::Facebook,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ResetStep {
    /// Email a reset link
    Request {
        #[arg(long)]
        email: String,
    },
    /// Set a new password using the uid and token from the link
    Confirm {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        token: String,
    },
}

/// There is no screen to return to; tell the user how to sign in again.
struct CliNavigator;

impl Navigator for CliNavigator {
    fn navigate(&self, route: &str) {
        debug!(route, "Login route requested");
        eprintln!("Session expired. Please run `crowdgate login` again.");
    }
}

fn build_accounts(config: &Config) -> Result<AccountsApi> {
    let store = config.credential_store()?;
    let client = ApiClient::builder(config.gateway.clone(), store)
        .navigator(Arc::new(CliNavigator))
        .build()
        .context("Failed to set up API client")?;

    client.events().on_identity_changed(|event| match event {
        IdentityEvent::LoggedIn(Some(identity)) => {
            if let Some(email) = &identity.email {
                eprintln!("Signed in as {email}");
            }
        }
        IdentityEvent::Refreshed(_) => debug!("Access token refreshed"),
        _ => {}
    });

    Ok(AccountsApi::new(client))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read password")
}

/// Guess a MIME type for common image extensions.
fn image_mime(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", path.display()))?
        .to_string();
    Ok(Upload {
        file_name,
        mime: image_mime(path),
        bytes,
    })
}

fn print_message(message: Option<String>, fallback: &str) {
    println!("{}", message.as_deref().unwrap_or(fallback));
}

pub async fn run(command: Command, config: &Config) -> Result<()> {
    let accounts = build_accounts(config)?;

    match command {
        Command::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password("Password: ")?,
            };
            accounts.login(&LoginRequest { email, password }).await?;
            println!("Logged in");
        }
        Command::SocialLogin { provider, token } => {
            let provider = SocialProvider::from(provider);
            accounts.social_login(provider, &token).await?;
            println!("Logged in with {provider}");
        }
        Command::Register {
            first_name,
            last_name,
            email,
            mobile_phone,
            picture,
        } => {
            let password = prompt_password("Password: ")?;
            let confirm_password = prompt_password("Confirm password: ")?;
            let profile_picture = picture.as_deref().map(read_upload).transpose()?;
            let ack = accounts
                .register(RegisterRequest {
                    first_name,
                    last_name,
                    email,
                    password,
                    confirm_password,
                    mobile_phone,
                    profile_picture,
                })
                .await?;
            print_message(ack.message, "Registered");
        }
        Command::Activate { uid, token } => {
            let ack = accounts.activate(&uid, &token).await?;
            print_message(ack.message, "Activated");
        }
        Command::Whoami => match accounts.current_identity() {
            Some(identity) => print_json(&identity)?,
            None => bail!("Not logged in"),
        },
        Command::Profile => print_json(&accounts.profile().await?)?,
        Command::UpdateProfile {
            username,
            mobile_phone,
            birthdate,
            country,
            picture,
        } => {
            let profile_picture = picture.as_deref().map(read_upload).transpose()?;
            let profile = accounts
                .update_profile(ProfileUpdate {
                    username,
                    mobile_phone,
                    birthdate,
                    country,
                    profile_picture,
                })
                .await?;
            print_json(&profile)?;
        }
        Command::DeleteAccount => {
            let password = prompt_password("Password to confirm deletion: ")?;
            accounts.delete_account(&password).await?;
            println!("Account deleted");
        }
        Command::Logout => {
            accounts.logout()?;
            println!("Logged out");
        }
        Command::ResetPassword { step } => match step {
            ResetStep::Request { email } => {
                let ack = accounts.request_password_reset(&email).await?;
                print_message(ack.message, "Reset email sent");
            }
            ResetStep::Confirm { uid, token } => {
                let new_password = prompt_password("New password: ")?;
                let ack = accounts.confirm_password_reset(&uid, &token, &new_password).await?;
                print_message(ack.message, "Password reset");
            }
        },
        Command::ChangePassword => {
            let old_password = prompt_password("Current password: ")?;
            let new_password = prompt_password("New password: ")?;
            let ack = accounts.change_password(&old_password, &new_password).await?;
            print_message(ack.message, "Password changed");
        }
        Command::CheckEmail { email } => {
            let exists = accounts.check_email(&email).await?;
            println!("{}", if exists { "registered" } else { "available" });
        }
        Command::Request { method, path, json } => {
            let method: Method = method
                .to_ascii_uppercase()
                .parse()
                .with_context(|| format!("Invalid HTTP method: {method}"))?;
            let mut request = PendingRequest::new(method, path);
            if let Some(json) = json {
                let body: serde_json::Value =
                    serde_json::from_str(&json).context("--json is not valid JSON")?;
                request = request.json(&body)?;
            }
            let body: serde_json::Value = accounts.client().execute_json(request).await?;
            print_json(&body)?;
        }
        Command::Config { save } => {
            print_json(config)?;
            if save {
                config.save()?;
                eprintln!("Saved to {}", Config::config_path()?.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_values() {
        assert_eq!(Provider::from_str("google", false), Ok(Provider::Google));
        assert!(Provider::from_str("github", false).is_err());
        assert_eq!(SocialProvider::from(Provider::Facebook), SocialProvider::Facebook);
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(Path::new("me.PNG")).as_deref(), Some("image/png"));
        assert_eq!(image_mime(Path::new("a/b/c.jpeg")).as_deref(), Some("image/jpeg"));
        assert_eq!(image_mime(Path::new("notes.txt")), None);
        assert_eq!(image_mime(Path::new("no_extension")), None);
    }
}
