/// Terminal front end: command parsing, colored rendering of session views
/// and the stdin loop that answers confirmations
use crate::error::{LinkError, Result};
use crate::notifications::FeedTab;
use crate::render::{DirectoryPanel, FeedPanel, Screen, SessionView, ThreadPanel};
use crate::replica::ReplicaLink;
use crate::session::{SessionCommand, SessionHandle};
use crate::types::DeliveryStatus;
use crate::ui::{DesktopNotifier, PromptRequest};
use colored::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};

/// What a typed line turned into
#[derive(Debug)]
pub enum Input {
    Command(SessionCommand),
    /// Move input between the main and the zoomed window
    Focus,
    Help,
    Quit,
}

/// Turn one line of terminal input into a command. Lines that are not a
/// `/command` are sent to the open thread.
pub fn parse_line(line: &str) -> Result<Input> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Command(SessionCommand::Send(line.to_string())));
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();
    let joined = |from: usize| {
        let label = args.get(from..).map(|a| a.join(" ")).unwrap_or_default();
        (!label.is_empty()).then_some(label)
    };

    let command = match name {
        "open" => SessionCommand::Open {
            conversation_id: parse_id(args.first(), "/open <conversation-id> [label]")?,
            label: joined(1),
        },
        "new" => {
            let user_id = parse_id(args.first(), "/new <user-id> [label]")?;
            SessionCommand::StartWith {
                user_id,
                label: joined(1).unwrap_or_else(|| format!("User #{}", user_id)),
            }
        }
        "back" => SessionCommand::ShowDirectory,
        "clear" => SessionCommand::DeleteAll,
        "retry" => {
            let n = args
                .first()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(1);
            SessionCommand::Retry(n)
        }
        "tab" => SessionCommand::SetTab(args.first().copied().unwrap_or("all").parse()?),
        "read" => match args.first().copied() {
            Some("all") => SessionCommand::MarkAllRead,
            other => SessionCommand::MarkRead(parse_id(other.as_ref(), "/read <id>|all")?),
        },
        "zoom" => SessionCommand::ToggleReplica,
        "focus" => return Ok(Input::Focus),
        "help" => return Ok(Input::Help),
        "quit" | "exit" => return Ok(Input::Quit),
        other => {
            return Err(LinkError::Validation(format!(
                "Unknown command: /{} (try /help)",
                other
            )))
        }
    };
    Ok(Input::Command(command))
}

fn parse_id(raw: Option<&&str>, usage: &str) -> Result<i64> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| LinkError::Validation(format!("Usage: {}", usage)))
}

/// Desktop notifications for a terminal: a bell and a highlighted line
pub struct TerminalNotifier;

impl DesktopNotifier for TerminalNotifier {
    fn notify(&self, title: &str, body: &str) {
        println!("\x07{} {} {}", "🔔".yellow(), title.bright_yellow().bold(), body);
    }
}

pub fn print_usage() {
    println!("{}", "💊 RxLink".bright_cyan().bold());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <id> [label]     Open a conversation", "/open".cyan());
    println!("  {} <user-id> [label] Start a conversation with a user", "/new".cyan());
    println!("  {}                  Back to the conversation list", "/back".cyan());
    println!("  {}                 Delete all messages in the open thread", "/clear".cyan());
    println!("  {} [n]             Retry the n-th failed message", "/retry".cyan());
    println!("  {} all|alerts|chat   Switch the notification tab", "/tab".cyan());
    println!("  {} <id>|all         Mark notifications read", "/read".cyan());
    println!("  {}                  Open or close the zoomed window", "/zoom".cyan());
    println!("  {}                 Type into the zoomed window (or back)", "/focus".cyan());
    println!("  {}                  Leave", "/quit".cyan());
    println!("  Anything else is sent to the open conversation.");
}

fn status_mark(status: Option<DeliveryStatus>) -> ColoredString {
    match status {
        None | Some(DeliveryStatus::Sent) => "".normal(),
        Some(DeliveryStatus::Sending) => " …".dimmed(),
        Some(DeliveryStatus::Failed) => " ✗ failed".red().bold(),
    }
}

fn print_directory(panel: &DirectoryPanel) {
    match panel {
        DirectoryPanel::Loading => println!("{}", "Loading conversations…".dimmed()),
        DirectoryPanel::Conversations { rows } => {
            println!("{}", format!("Conversations ({})", rows.len()).bright_cyan().bold());
            println!("{}", "─".repeat(60).dimmed());
            for row in rows {
                let unread = if row.unread > 0 {
                    format!(" [{}]", row.unread).green().bold()
                } else {
                    "".normal()
                };
                println!(
                    "  {} {} {}{} {}",
                    format!("#{}", row.id).cyan(),
                    row.label.bright_white(),
                    row.branches.dimmed(),
                    unread,
                    row.time.as_deref().unwrap_or("").dimmed()
                );
                if !row.preview.is_empty() {
                    println!("      {}", row.preview.dimmed());
                }
            }
        }
        DirectoryPanel::Users { rows } => {
            println!("{}", "Start a conversation".bright_cyan().bold());
            println!("{}", "─".repeat(60).dimmed());
            for row in rows {
                println!(
                    "  {} {} {}",
                    format!("#{}", row.id).cyan(),
                    row.name.bright_white(),
                    row.subtitle.dimmed()
                );
            }
        }
        DirectoryPanel::Empty { message } => println!("{}", message.yellow()),
    }
}

fn print_thread(panel: &ThreadPanel) {
    println!(
        "{} {}",
        panel.title.bright_cyan().bold(),
        format!("(#{})", panel.conversation_id).dimmed()
    );
    println!("{}", "─".repeat(60).dimmed());
    if panel.loading {
        println!("{}", "Loading…".dimmed());
    }
    let mut failed = 0;
    for row in &panel.messages {
        let who = if row.mine { "you".green() } else { "them".blue() };
        let retry_hint = if row.status == Some(DeliveryStatus::Failed) {
            failed += 1;
            format!(" (/retry {})", failed).dimmed()
        } else {
            "".normal()
        };
        println!(
            "  {} {} {}{}{}",
            row.time.dimmed(),
            who,
            row.content,
            status_mark(row.status),
            retry_hint
        );
    }
    if let Some(empty) = &panel.empty_state {
        println!("{}", empty.yellow());
    }
}

fn print_feed(feed: &FeedPanel) {
    for row in feed.rows.iter().take(5) {
        let dot = if row.unread { "●".green() } else { "○".dimmed() };
        println!(
            "  {} {} {} {}",
            dot,
            format!("[{}]", row.source).dimmed(),
            row.title.bright_white(),
            row.message.dimmed()
        );
    }
    if let Some(empty) = &feed.empty_state {
        println!("  {}", empty.dimmed());
    }
}

pub fn print_view(view: &SessionView, window: &str) {
    let badge = match &view.badge.label {
        Some(label) => format!(" 🔔 {}", label).red().bold(),
        None => "".normal(),
    };
    let zoom = if view.zoomed { " 🔍" } else { "" };
    println!();
    println!("{}{}{}", format!("╭─ {} ", window).bright_cyan(), badge, zoom);
    match &view.screen {
        Screen::Directory(panel) => print_directory(panel),
        Screen::Thread(panel) => print_thread(panel),
    }
    println!("{}", format!("Notifications ({:?})", view.feed.tab).dimmed());
    print_feed(&view.feed);
    println!("{}", "╰─".bright_cyan());
}

/// Wait for the next change of an optional view; pends forever without one
async fn replica_changed(view: &mut Option<watch::Receiver<SessionView>>) -> bool {
    match view {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

/// Session's answer to a replica lookup; pends forever while none is asked
async fn replica_reply(
    pending: &mut Option<oneshot::Receiver<Option<ReplicaLink>>>,
) -> Option<ReplicaLink> {
    match pending {
        Some(rx) => rx.await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Drive a session from the terminal until `/quit` or end of input
pub async fn run(
    handle: SessionHandle,
    prompts: mpsc::UnboundedReceiver<PromptRequest>,
) -> anyhow::Result<()> {
    print_usage();
    drive(handle, prompts, BufReader::new(tokio::io::stdin())).await?;
    println!("{}", "Bye.".dimmed());
    Ok(())
}

/// Same loop over any line source. Nothing in here waits on the session
/// itself, so a confirmation still queued in `prompts` can always be read.
pub async fn drive<R>(
    handle: SessionHandle,
    mut prompts: mpsc::UnboundedReceiver<PromptRequest>,
    input: R,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut view = handle.view();
    let mut replica: Option<ReplicaLink> = None;
    let mut zoomed_view: Option<watch::Receiver<SessionView>> = None;
    let mut pending_replica: Option<oneshot::Receiver<Option<ReplicaLink>>> = None;
    let mut zoomed_focus = false;
    let mut pending_confirm: Option<oneshot::Sender<bool>> = None;
    let mut lines = input.lines();

    print_view(&view.borrow_and_update(), "RxLink");

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                print_view(&current, "RxLink");
            }
            alive = replica_changed(&mut zoomed_view) => {
                match zoomed_view.as_mut() {
                    Some(rx) if alive => {
                        let current = rx.borrow_and_update().clone();
                        print_view(&current, "RxLink (zoomed)");
                    }
                    _ => {
                        replica = None;
                        zoomed_view = None;
                        if zoomed_focus {
                            zoomed_focus = false;
                            println!(
                                "{}",
                                "Zoomed window closed; input is back on the main window".dimmed()
                            );
                        }
                    }
                }
            }
            link = replica_reply(&mut pending_replica) => {
                pending_replica = None;
                zoomed_view = link.as_ref().map(ReplicaLink::view);
                replica = link;
                if replica.is_none() {
                    zoomed_focus = false;
                }
            }
            Some(request) = prompts.recv() => match request {
                PromptRequest::Alert(message) => {
                    eprintln!("{} {}", "✗".red().bold(), message.red());
                }
                PromptRequest::Confirm { question, reply } => {
                    println!("{} {}", "?".yellow().bold(), format!("{} [y/N]", question).yellow());
                    pending_confirm = Some(reply);
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(reply) = pending_confirm.take() {
                    let yes = matches!(line.trim().to_lowercase().as_str(), "y" | "yes");
                    let _ = reply.send(yes);
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let target = replica.as_ref().filter(|link| zoomed_focus && !link.is_closed());
                match parse_line(&line) {
                    Ok(Input::Quit) => break,
                    Ok(Input::Help) => print_usage(),
                    Ok(Input::Focus) => match &replica {
                        Some(_) => {
                            zoomed_focus = !zoomed_focus;
                            let window = if zoomed_focus { "zoomed" } else { "main" };
                            println!("{}", format!("Input goes to the {} window", window).dimmed());
                        }
                        None => {
                            eprintln!("{} {}", "✗".red().bold(), "No zoomed window is open".red())
                        }
                    },
                    Ok(Input::Command(command)) => match target {
                        // Inside the zoomed window, /zoom closes it
                        Some(link) => {
                            if let Err(e) = link.send(command).await {
                                eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
                            }
                        }
                        None => {
                            let zoom = matches!(command, SessionCommand::ToggleReplica);
                            handle.send(command).await?;
                            if zoom {
                                let (tx, rx) = oneshot::channel();
                                handle.send(SessionCommand::Replica(tx)).await?;
                                pending_replica = Some(rx);
                            }
                        }
                    },
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e.to_string().red()),
                }
            }
        }
    }

    if let Some(reply) = pending_confirm.take() {
        let _ = reply.send(false);
    }
    // Unread confirmations resolve as "no" once their reply senders drop
    drop(prompts);
    handle.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        match parse_line("  hello there ").unwrap() {
            Input::Command(SessionCommand::Send(text)) => assert_eq!(text, "hello there"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_open_with_label() {
        match parse_line("/open 5 Ana Lopez").unwrap() {
            Input::Command(SessionCommand::Open {
                conversation_id,
                label,
            }) => {
                assert_eq!(conversation_id, 5);
                assert_eq!(label.as_deref(), Some("Ana Lopez"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse_line("/open").unwrap_err(),
            LinkError::Validation(_)
        ));
    }

    #[test]
    fn test_new_defaults_label() {
        match parse_line("/new 12").unwrap() {
            Input::Command(SessionCommand::StartWith { user_id, label }) => {
                assert_eq!(user_id, 12);
                assert_eq!(label, "User #12");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tab_read_retry_and_unknown() {
        assert!(matches!(
            parse_line("/tab alerts").unwrap(),
            Input::Command(SessionCommand::SetTab(FeedTab::Alerts))
        ));
        assert!(parse_line("/tab nope").is_err());
        assert!(matches!(
            parse_line("/read all").unwrap(),
            Input::Command(SessionCommand::MarkAllRead)
        ));
        assert!(matches!(
            parse_line("/read 9").unwrap(),
            Input::Command(SessionCommand::MarkRead(9))
        ));
        assert!(matches!(
            parse_line("/retry").unwrap(),
            Input::Command(SessionCommand::Retry(1))
        ));
        assert!(matches!(parse_line("/quit").unwrap(), Input::Quit));
        assert!(matches!(parse_line("/focus").unwrap(), Input::Focus));
        assert!(parse_line("/frobnicate").is_err());
    }
}
