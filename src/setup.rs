//! Interactive setup of the mail settings.
//!
//! Every run asks for each setting again, offering the cached value as the
//! default so that hitting enter keeps it. The password is asked for every time
//! and never written to the cache.

use std::{fmt::Debug, net::ToSocketAddrs, path::Path, sync::OnceLock};

use anyhow::Context;
use dialoguer::{Input, Password};
use lettre::Address;
use log::{debug, warn};
use regex::Regex;

use crate::{
    config::{Config, ConfigCache},
    units::TimeUnit,
};

/// Implicit TLS submission port
pub const DEFAULT_PORT: u16 = 465;

/// Environment variable read for the password when not prompting
pub const PASSWORD_ENV_VAR: &str = "TASK_MAILER_PASSWORD";

/// Source of answers during setup
pub trait Prompter {
    /// Asks for a single line of text, `prompt` does not include a trailing colon
    fn input(&mut self, prompt: &str) -> anyhow::Result<String>;

    /// Asks for hidden input
    fn password(&mut self, prompt: &str) -> anyhow::Result<String>;

    /// Told about an answer that failed validation, the question is asked again afterwards
    fn rejected(&mut self, parameter: &str, value: &str);

    fn note(&mut self, msg: &str);
}

/// Asks the questions on the terminal
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str) -> anyhow::Result<String> {
        Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .context("Failed to read answer from terminal")
    }

    fn password(&mut self, prompt: &str) -> anyhow::Result<String> {
        Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .context("Failed to read password from terminal")
    }

    fn rejected(&mut self, parameter: &str, value: &str) {
        println!("The given {parameter} '{value}' is not valid.");
    }

    fn note(&mut self, msg: &str) {
        println!("{msg}");
    }
}

/// Everything needed to log in to the SMTP server
#[derive(Clone)]
pub struct Credentials {
    pub config: Config,
    pub password: String,
}

impl Credentials {
    /// Uses the password from [`PASSWORD_ENV_VAR`]
    pub fn from_env(config: Config) -> anyhow::Result<Self> {
        let password = std::env::var(PASSWORD_ENV_VAR)
            .with_context(|| format!("Password must be provided in {PASSWORD_ENV_VAR}"))?;
        Ok(Self { config, password })
    }
}

/// Settings from the cache file at `config_path` without asking for anything
///
/// The cache must be complete and the password is taken from [`PASSWORD_ENV_VAR`]
pub fn cached_credentials(config_path: &Path) -> anyhow::Result<Credentials> {
    let cache = ConfigCache::load_from(config_path)?;
    let config = Config::try_from(cache)
        .with_context(|| format!("Incomplete settings in {config_path:?}"))?;
    Credentials::from_env(config)
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("config", &self.config)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Walks through every setting, using `cache` for the defaults
///
/// `resolves` is used to check that the SMTP server name can be looked up
pub fn configure(
    cache: ConfigCache,
    prompter: &mut dyn Prompter,
    resolves: &dyn Fn(&str) -> bool,
) -> anyhow::Result<Credentials> {
    prompter.note("Let's set up the task mailer!");
    prompter.note("Hit enter to use the default values.");

    let email = ask(prompter, "email", cache.email, "", &is_valid_sender)?;
    let password = prompter.password("Password")?;
    let task_name = ask(prompter, "task_name", cache.task_name, "", &|s| {
        !s.is_empty()
    })?;
    let recipients = ask(
        prompter,
        "recipients",
        Some(cache.recipients.unwrap_or_else(|| email.clone())),
        ", separated by a comma",
        &are_valid_emails,
    )?;

    let unit_choices = TimeUnit::ALL.map(|u| u.symbol()).join(", ");
    let report_timeout_unit: TimeUnit = ask(
        prompter,
        "report_timeout_unit",
        Some(cache.report_timeout_unit.unwrap_or_default().to_string()),
        &format!(", one of {unit_choices}"),
        &|s| s.parse::<TimeUnit>().is_ok(),
    )?
    .parse()?;
    let report_timeout: u32 = ask(
        prompter,
        "report_timeout",
        Some(
            cache
                .report_timeout
                .unwrap_or_else(|| report_timeout_unit.default_amount())
                .to_string(),
        ),
        &format!(", in {}", report_timeout_unit.name()),
        &|s| is_positive_int::<u32>(s),
    )?
    .parse()
    .context("Failed to parse report_timeout")?;
    let port: u16 = ask(
        prompter,
        "port",
        Some(cache.port.unwrap_or(DEFAULT_PORT).to_string()),
        "",
        &|s| is_positive_int::<u16>(s),
    )?
    .parse()
    .context("Failed to parse port")?;
    let smtp_server = ask(
        prompter,
        "smtp_server",
        cache.smtp_server.or_else(|| default_smtp_server(&email)),
        "",
        &|s| is_valid_domain(s) && resolves(s),
    )?;

    let config = Config {
        email,
        task_name,
        recipients,
        report_timeout_unit,
        report_timeout,
        port,
        smtp_server,
    };
    debug!("Setup completed with {config:?}");
    Ok(Credentials { config, password })
}

/// Repeats the question until the answer passes `validator`
///
/// An empty answer selects `current`, but only if it is itself valid
fn ask(
    prompter: &mut dyn Prompter,
    parameter: &str,
    current: Option<String>,
    comment: &str,
    validator: &dyn Fn(&str) -> bool,
) -> anyhow::Result<String> {
    let default = match &current {
        Some(val) => format!(" [{val}]"),
        None => String::new(),
    };
    let prompt = format!("Please insert {parameter}{comment}{default}");
    loop {
        let answer = prompter.input(&prompt)?;
        let answer = answer.trim();
        if answer.is_empty() {
            if let Some(current) = current.as_ref().filter(|c| validator(c)) {
                return Ok(current.clone());
            }
        }
        if validator(answer) {
            return Ok(answer.to_string());
        }
        prompter.rejected(parameter, answer);
    }
}

/// `smtp.` followed by the last two labels of the address' domain
pub fn default_smtp_server(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(format!("smtp.{}", labels[labels.len() - 2..].join(".")))
}

pub fn is_valid_email(email: &str) -> bool {
    email.parse::<Address>().is_ok()
}

/// Gmail refuses plain password logins so it cannot be used to send
pub fn is_valid_sender(email: &str) -> bool {
    !email.ends_with("gmail.com") && is_valid_email(email)
}

pub fn are_valid_emails(emails: &str) -> bool {
    emails.split(',').all(|e| is_valid_email(e.trim()))
}

pub fn is_valid_domain(server: &str) -> bool {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let re = CELL.get_or_init(|| {
        debug!("Compiling regex for validating domains");
        Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z][a-zA-Z0-9-]{0,61}[a-zA-Z0-9]$")
            .expect("failed to compile regex")
    });
    server.len() <= 253 && re.is_match(server)
}

pub fn is_positive_int<T>(value: &str) -> bool
where
    T: std::str::FromStr + PartialOrd + Default,
{
    matches!(value.parse::<T>(), Ok(n) if n > T::default())
}

/// True if a DNS lookup of `server` returns at least one address
pub fn is_resolvable(server: &str) -> bool {
    match (server, 0).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(e) => {
            warn!("Unable to resolve {server:?}: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use rstest::rstest;

    #[derive(Default)]
    struct ScriptedPrompter {
        answers: VecDeque<&'static str>,
        prompts: Vec<String>,
        rejected: Vec<(String, String)>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn input(&mut self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.push(prompt.to_string());
            match self.answers.pop_front() {
                Some(answer) => Ok(answer.to_string()),
                None => anyhow::bail!("ran out of answers at {prompt:?}"),
            }
        }

        fn password(&mut self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.push(prompt.to_string());
            Ok("hunter2".to_string())
        }

        fn rejected(&mut self, parameter: &str, value: &str) {
            self.rejected.push((parameter.to_string(), value.to_string()));
        }

        fn note(&mut self, _msg: &str) {}
    }

    fn always(_: &str) -> bool {
        true
    }

    #[test]
    fn fresh_setup_uses_derived_defaults() {
        let mut prompter = ScriptedPrompter::new(&[
            "me@mail.example.com",
            "nightly build",
            "", // recipients default to the sender
            "", // unit defaults to hours
            "", // timeout defaults to the unit default
            "", // port
            "", // server derived from the address
        ]);

        let actual = configure(ConfigCache::default(), &mut prompter, &always).unwrap();

        assert_eq!(actual.password, "hunter2");
        let config = actual.config;
        assert_eq!(config.email, "me@mail.example.com");
        assert_eq!(config.task_name, "nightly build");
        assert_eq!(config.recipients, "me@mail.example.com");
        assert_eq!(config.report_timeout_unit, TimeUnit::Hours);
        assert_eq!(config.report_timeout, 24);
        assert_eq!(config.port, 465);
        assert_eq!(config.smtp_server, "smtp.example.com");
        assert!(prompter.rejected.is_empty());
    }

    #[test]
    fn cached_values_are_offered_as_defaults() {
        let cache = ConfigCache::from(&crate::config::tests::sample_config());
        let mut prompter = ScriptedPrompter::new(&["", "", "", "", "", "", ""]);

        let actual = configure(cache, &mut prompter, &always).unwrap();

        assert_eq!(actual.config, crate::config::tests::sample_config());
        assert_eq!(prompter.prompts[0], "Please insert email [me@example.com]");
        assert_eq!(prompter.prompts[1], "Password");
        assert!(prompter
            .prompts
            .contains(&"Please insert report_timeout, in minutes [30]".to_string()));
    }

    #[test]
    fn invalid_answers_are_asked_again() {
        let mut prompter = ScriptedPrompter::new(&[
            "someone@gmail.com",
            "me@example.com",
            "", // no default for the task name
            "job",
            "me@example.com,broken",
            "me@example.com,you@example.com",
            "d",
            "s",
            "0",
            "15",
            "70000",
            "587",
            "not a server",
            "mail.example.com",
        ]);

        let actual = configure(ConfigCache::default(), &mut prompter, &always)
            .unwrap()
            .config;

        assert_eq!(actual.email, "me@example.com");
        assert_eq!(actual.recipients, "me@example.com,you@example.com");
        assert_eq!(actual.report_timeout_unit, TimeUnit::Seconds);
        assert_eq!(actual.report_timeout, 15);
        assert_eq!(actual.port, 587);
        assert_eq!(actual.smtp_server, "mail.example.com");
        let rejected: Vec<&str> = prompter.rejected.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            rejected,
            vec![
                "email",
                "task_name",
                "recipients",
                "report_timeout_unit",
                "report_timeout",
                "port",
                "smtp_server"
            ]
        );
    }

    #[test]
    fn invalid_cached_default_is_not_used() {
        let cache = ConfigCache {
            email: Some("cached@gmail.com".into()),
            ..Default::default()
        };
        let mut prompter =
            ScriptedPrompter::new(&["", "me@example.com", "job", "", "", "", "", ""]);

        let actual = configure(cache, &mut prompter, &always).unwrap().config;

        assert_eq!(actual.email, "me@example.com");
        assert_eq!(prompter.rejected, vec![("email".to_string(), String::new())]);
    }

    #[test]
    fn unresolvable_server_is_rejected() {
        let mut prompter = ScriptedPrompter::new(&[
            "me@example.com",
            "job",
            "",
            "",
            "",
            "",
            "",
            "smtp.example.org",
        ]);

        let actual = configure(ConfigCache::default(), &mut prompter, &|s| {
            s == "smtp.example.org"
        })
        .unwrap()
        .config;

        assert_eq!(actual.smtp_server, "smtp.example.org");
        assert_eq!(prompter.rejected.len(), 1);
    }

    #[rstest]
    #[case("me@example.com", Some("smtp.example.com"))]
    #[case("me@mail.uni.example.org", Some("smtp.example.org"))]
    #[case("me@localhost", None)]
    #[case("not-an-email", None)]
    fn derived_server(#[case] email: &str, #[case] expected: Option<&str>) {
        assert_eq!(default_smtp_server(email).as_deref(), expected);
    }

    #[rstest]
    #[case("me@example.com", true)]
    #[case("first.last+tag@sub.example.org", true)]
    #[case("me@gmail.com", false)]
    #[case("no-at-sign", false)]
    #[case("", false)]
    fn senders(#[case] email: &str, #[case] expected: bool) {
        assert_eq!(is_valid_sender(email), expected);
    }

    #[rstest]
    #[case("a@example.com", true)]
    #[case("a@example.com,b@gmail.com", true)]
    #[case("a@example.com, b@example.com", true)]
    #[case("a@example.com,", false)]
    #[case("a@example.com,b", false)]
    fn recipient_lists(#[case] emails: &str, #[case] expected: bool) {
        assert_eq!(are_valid_emails(emails), expected);
    }

    #[rstest]
    #[case("smtp.example.com", true)]
    #[case("mail-1.example.co.uk", true)]
    #[case("localhost", false)]
    #[case("-bad.example.com", false)]
    #[case("spaces in.example.com", false)]
    #[case("example.", false)]
    fn domains(#[case] server: &str, #[case] expected: bool) {
        assert_eq!(is_valid_domain(server), expected);
    }

    #[rstest]
    #[case("1", true)]
    #[case("465", true)]
    #[case("0", false)]
    #[case("-3", false)]
    #[case("abc", false)]
    #[case("70000", false)]
    fn positive_ports(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(is_positive_int::<u16>(value), expected);
    }

    #[test]
    fn cached_credentials_take_password_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        ConfigCache::from(&crate::config::tests::sample_config())
            .store_to(&path)
            .unwrap();

        // Both cases in one test as they share the process environment
        std::env::set_var(PASSWORD_ENV_VAR, "from-env");
        let actual = cached_credentials(&path).unwrap();
        assert_eq!(actual.password, "from-env");
        assert_eq!(actual.config, crate::config::tests::sample_config());

        std::env::remove_var(PASSWORD_ENV_VAR);
        let err = cached_credentials(&path).unwrap_err();
        assert!(format!("{err}").contains(PASSWORD_ENV_VAR), "{err}");
    }

    #[test]
    fn cached_credentials_need_complete_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        ConfigCache {
            email: Some("me@example.com".into()),
            task_name: Some("job".into()),
            ..Default::default()
        }
        .store_to(&path)
        .unwrap();

        let err = cached_credentials(&path).unwrap_err();

        let chain = format!("{err:#}");
        assert!(chain.contains("Incomplete settings"), "{chain}");
        assert!(chain.contains("smtp_server"), "{chain}");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            config: crate::config::tests::sample_config(),
            password: "hunter2".to_string(),
        };
        let shown = format!("{credentials:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}
