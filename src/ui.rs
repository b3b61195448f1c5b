// UI layer: interactive menus built on `dialoguer`.
// Each handler collects input, runs one component and prints its outcome;
// none of them hold state beyond the credential store passed around.

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use dialoguer::{Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::stdout;
use std::time::Duration;

use crate::acquirer::{SessionAcquirer, TokenHarvester};
use crate::context::AppContext;
use crate::executor::{ActionExecutor, MAX_DELAY_SECS, MAX_REPETITIONS};
use crate::guard::ShieldGuard;
use crate::prober::{ShieldState, StateProber};
use crate::session::abbreviate;
use crate::store::{AccountRecord, CredentialStore};

/// Main interactive menu. Runs until the user picks "Exit".
pub fn main_menu(ctx: &AppContext) -> Result<()> {
    let mut store = ctx.open_store();
    loop {
        clear_screen();
        if let Some(account) = store.current() {
            println!("Selected account: {} ({})\n", account.display_name, account.remote_user_id);
        }
        let items = vec!["Accounts management", "Repeat action", "Shield toggle", "Settings", "Exit"];
        let selection = Select::new()
            .with_prompt("Main menu")
            .items(&items)
            .default(0)
            .interact()?;
        match selection {
            0 => accounts_menu(ctx, &mut store)?,
            1 => {
                if let Some(account) = require_account(&store)? {
                    handle_repeat_action(ctx, &mut store, &account)?;
                }
            }
            2 => {
                if let Some(account) = require_account(&store)? {
                    handle_shield(ctx, &mut store, &account)?;
                }
            }
            3 => show_settings(ctx, &store)?,
            4 => break,
            _ => {}
        }
    }
    Ok(())
}

fn accounts_menu(ctx: &AppContext, store: &mut CredentialStore) -> Result<()> {
    loop {
        clear_screen();
        let items = vec![
            "Login with credentials",
            "Add session manually",
            "List accounts",
            "Select account",
            "Remove account",
            "Validate stored sessions",
            "Back",
        ];
        let selection = Select::new()
            .with_prompt("Accounts management")
            .items(&items)
            .default(0)
            .interact()?;
        match selection {
            0 => handle_login(ctx, store)?,
            1 => handle_add_session(ctx, store)?,
            2 => list_accounts(store),
            3 => select_account(store)?,
            4 => remove_account(store)?,
            5 => {
                for report in store.validate_all() {
                    let mark = if report.valid { "valid" } else { "INVALID" };
                    println!("{} ({}): {mark} - {}", report.display_name, report.remote_user_id, report.message);
                }
            }
            _ => return Ok(()),
        }
        pause()?;
    }
}

fn handle_login(ctx: &AppContext, store: &mut CredentialStore) -> Result<()> {
    let identifier: String = Input::new().with_prompt("Email or UID").interact_text()?;
    let secret: String = Password::new().with_prompt("Password").interact()?;

    let progress = spinner("Logging in...");
    let outcome = SessionAcquirer::new(ctx).login(&identifier, &secret);
    progress.finish_and_clear();

    let Some(fields) = outcome.record.filter(|_| outcome.success) else {
        println!("Login failed: {}", outcome.message);
        return Ok(());
    };
    match store.add(&fields.session_blob, Some(&fields.display_name), Some(&fields.derived_token)) {
        Ok(record) => {
            println!("{}", outcome.message);
            println!("Account: {}\nUID: {}", record.display_name, record.remote_user_id);
            warn_if_unsaved(store.set_current(&record.local_id), "account selection");
        }
        Err(e) => println!("Logged in, but the session could not be stored: {e}"),
    }
    Ok(())
}

fn handle_add_session(ctx: &AppContext, store: &mut CredentialStore) -> Result<()> {
    let blob: String = Input::new().with_prompt("Session (cookie string)").interact_text()?;
    let name: String = Input::new()
        .with_prompt("Display name (optional)")
        .allow_empty(true)
        .interact_text()?;

    let progress = spinner("Looking for a token...");
    let token = TokenHarvester::new(ctx)
        .ok()
        .and_then(|h| h.harvest(blob.trim()));
    progress.finish_and_clear();

    let name = Some(name.trim()).filter(|n| !n.is_empty());
    match store.add(&blob, name, token.as_deref()) {
        Ok(record) => {
            ctx.activity.record("Add Session", true, &record.remote_user_id);
            println!("Stored account: {} ({})", record.display_name, record.remote_user_id);
            if token.is_none() {
                println!("No token found; shield toggling needs one.");
            }
        }
        Err(e) => {
            ctx.activity.record("Add Session", false, &e.to_string());
            println!("{e}");
        }
    }
    Ok(())
}

fn list_accounts(store: &CredentialStore) {
    if !store.has_any() {
        println!("No accounts stored.");
        return;
    }
    for (idx, account) in store.list().iter().enumerate() {
        let added = account
            .added_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "[{}] {} (UID {})\n    session: {}\n    token:   {}\n    added:   {added}",
            idx + 1,
            account.display_name,
            account.remote_user_id,
            abbreviate(&account.session_blob),
            abbreviate(&account.derived_token),
        );
    }
}

fn pick_account(store: &CredentialStore, prompt: &str) -> Result<Option<AccountRecord>> {
    if !store.has_any() {
        println!("No accounts stored.");
        return Ok(None);
    }
    let labels: Vec<String> = store
        .list()
        .iter()
        .map(|a| format!("{} ({})", a.display_name, a.remote_user_id))
        .collect();
    let idx = Select::new().with_prompt(prompt).items(&labels).default(0).interact()?;
    Ok(store.list().get(idx).cloned())
}

fn select_account(store: &mut CredentialStore) -> Result<()> {
    if let Some(account) = pick_account(store, "Select account")? {
        if store.set_current(&account.local_id) {
            println!("Now using {}", account.display_name);
        } else {
            println!("Could not save the selection.");
        }
    }
    Ok(())
}

fn remove_account(store: &mut CredentialStore) -> Result<()> {
    let Some(account) = pick_account(store, "Remove account")? else {
        return Ok(());
    };
    let sure = Confirm::new()
        .with_prompt(format!("Remove {}?", account.display_name))
        .interact()?;
    if sure {
        if store.remove(&account) {
            println!("Removed {}", account.display_name);
        } else {
            println!("Failed to save the store; nothing was removed.");
        }
    }
    Ok(())
}

fn require_account(store: &CredentialStore) -> Result<Option<AccountRecord>> {
    match store.current() {
        Some(account) => Ok(Some(account.clone())),
        None => {
            println!("Add an account first under Accounts management.");
            pause()?;
            Ok(None)
        }
    }
}

fn handle_repeat_action(ctx: &AppContext, store: &mut CredentialStore, account: &AccountRecord) -> Result<()> {
    let url: String = Input::new().with_prompt("Resource URL").interact_text()?;
    let repetitions: u32 = Input::new()
        .with_prompt("Repetitions")
        .validate_with(|v: &u32| -> Result<(), String> {
            if (1..=MAX_REPETITIONS).contains(v) {
                Ok(())
            } else {
                Err(format!("Enter a number between 1 and {MAX_REPETITIONS}"))
            }
        })
        .interact_text()?;
    let delay: u32 = Input::new()
        .with_prompt("Delay between attempts (seconds)")
        .default(1)
        .validate_with(|v: &u32| -> Result<(), String> {
            if (1..=MAX_DELAY_SECS).contains(v) {
                Ok(())
            } else {
                Err(format!("Enter a number between 1 and {MAX_DELAY_SECS}"))
            }
        })
        .interact_text()?;

    let progress = spinner("Working... do not close the terminal");
    let summary = ActionExecutor::new(ctx).repeat_action(&account.session_blob, &url, repetitions, delay);
    progress.finish_and_clear();

    println!("{}", summary.message);
    if summary.attempts > 0 {
        warn_if_unsaved(store.touch(&account.remote_user_id), "last-used time");
    }
    pause()
}

fn handle_shield(ctx: &AppContext, store: &mut CredentialStore, account: &AccountRecord) -> Result<()> {
    let choice = Select::new()
        .with_prompt("Shield")
        .items(&["Turn on", "Turn off", "Back"])
        .default(0)
        .interact()?;
    let enable = match choice {
        0 => true,
        1 => false,
        _ => return Ok(()),
    };

    let probing = spinner("Checking current state...");
    let report = StateProber::new(ctx).probe(&account.session_blob, &account.remote_user_id);
    probing.finish_and_clear();
    println!("{}", report.diagnostic);

    match report.state {
        ShieldState::On if enable => {
            println!("The shield is already on.");
            return pause();
        }
        ShieldState::Off if !enable => {
            println!("The shield is already off.");
            return pause();
        }
        ShieldState::Unknown => {
            let proceed = Confirm::new()
                .with_prompt("Current state could not be determined. Continue anyway?")
                .default(false)
                .interact()?;
            if !proceed {
                return Ok(());
            }
        }
        _ => {}
    }

    let toggling = spinner(if enable { "Activating shield..." } else { "Deactivating shield..." });
    let (ok, message) = ShieldGuard::new(ctx).set_shield(account, enable);
    toggling.finish_and_clear();
    println!("{message}");
    if ok {
        warn_if_unsaved(store.touch(&account.remote_user_id), "last-used time");
    }
    pause()
}

fn show_settings(ctx: &AppContext, store: &CredentialStore) -> Result<()> {
    let cfg = &ctx.config;
    println!("monokit-cli {}", env!("CARGO_PKG_VERSION"));
    println!("Store file:   {}", store.path().display());
    println!("Logs:         {}", ctx.activity.dir().display());
    println!("API base:     {}", cfg.endpoints.api_base);
    println!("Web base:     {}", cfg.endpoints.web_base);
    println!("Timeout:      {}s (connect {}s)", cfg.timeout_secs, cfg.connect_timeout_secs);
    println!("Operator tag: {}", cfg.owner_tag);
    pause()
}

fn warn_if_unsaved(saved: bool, what: &str) {
    if let Some(warning) = unsaved_warning(saved, what) {
        println!("{warning}");
    }
}

// The store rolls memory back when a write fails, so the user has to hear
// that the change did not stick.
fn unsaved_warning(saved: bool, what: &str) -> Option<String> {
    (!saved).then(|| format!("Warning: the {what} could not be saved and was reverted."))
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn pause() -> Result<()> {
    let _: String = Input::new()
        .with_prompt("Press Enter to continue")
        .allow_empty(true)
        .interact_text()?;
    Ok(())
}

fn clear_screen() {
    // Not fatal: a dumb terminal just keeps scrolling.
    let _ = execute!(stdout(), Clear(ClearType::All), MoveTo(0, 0));
}
