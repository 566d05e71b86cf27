//! Mailbox subcommands: reads, label changes, and the refused operations.

use anyhow::bail;
use clap::{Args, Subcommand};
use mailguard::{
    LabelColor, LabelId, LabelUpdate, MailService, MessageId, ModifyRequest, NewLabel, ThreadId,
    ThreadOutcome, ThreadQuery,
};
use serde::Serialize;

use super::print_json;

/// Arguments for `mailguard search`.
#[derive(Args)]
pub struct SearchArgs {
    /// Gmail search query (e.g. "from:alice is:unread")
    pub query: Option<String>,

    /// Maximum threads per page (1-500)
    #[arg(long, default_value_t = 20)]
    pub max: u32,

    /// Continuation token from a previous page
    #[arg(long)]
    pub page_token: Option<String>,

    /// Restrict to a label ID (repeatable)
    #[arg(long = "label", value_name = "LABEL_ID")]
    pub labels: Vec<String>,
}

impl SearchArgs {
    fn into_query(self) -> ThreadQuery {
        let mut query = match self.query {
            Some(q) => ThreadQuery::new(q),
            None => ThreadQuery::default(),
        }
        .with_max_results(self.max);
        if let Some(token) = self.page_token {
            query = query.with_page_token(token);
        }
        self.labels
            .into_iter()
            .fold(query, |query, label| query.with_label(label))
    }
}

/// Label subcommands.
#[derive(Subcommand)]
pub enum LabelsCmd {
    /// List all labels.
    List,

    /// Create a user label.
    Create {
        /// Label name
        name: String,

        /// Text color from the Gmail palette (e.g. "#ffffff")
        #[arg(long, requires = "background_color")]
        text_color: Option<String>,

        /// Background color from the Gmail palette (e.g. "#4a86e8")
        #[arg(long, requires = "text_color")]
        background_color: Option<String>,
    },

    /// Rename or recolor a label.
    Edit {
        /// Label ID
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        #[arg(long, requires = "background_color")]
        text_color: Option<String>,

        #[arg(long, requires = "text_color")]
        background_color: Option<String>,
    },
}

/// Arguments for `mailguard modify`.
#[derive(Args)]
pub struct ModifyArgs {
    /// Thread IDs
    #[arg(required = true)]
    pub thread_ids: Vec<String>,

    /// Label to add (repeatable)
    #[arg(long = "add", value_name = "LABEL_ID")]
    pub add: Vec<String>,

    /// Label to remove (repeatable)
    #[arg(long = "remove", value_name = "LABEL_ID")]
    pub remove: Vec<String>,

    /// Allow SPAM and TRASH in --add for this call
    #[arg(long)]
    pub allow_dangerous: bool,
}

/// Arguments for `mailguard attachment`.
#[derive(Args)]
pub struct AttachmentArgs {
    /// Message ID the attachment belongs to
    pub message_id: String,

    /// Attachment ID from the thread output
    pub attachment_id: String,

    /// Filename to save under (sanitized)
    #[arg(long)]
    pub filename: Option<String>,
}

/// Anything passed to `mailguard send`; it is refused regardless.
#[derive(Args)]
pub struct SendArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub args: Vec<String>,
}

#[derive(Serialize)]
struct ThreadLink {
    thread_id: ThreadId,
    url: String,
}

pub fn search(
    service: &mut MailService,
    account: Option<&str>,
    args: SearchArgs,
) -> anyhow::Result<()> {
    let page = service.search(account, &args.into_query())?;
    print_json(&page)
}

pub fn thread(service: &mut MailService, account: Option<&str>, id: &str) -> anyhow::Result<()> {
    let thread = service.get_thread(account, &ThreadId::new(id))?;
    print_json(&thread)
}

pub fn labels(
    service: &mut MailService,
    account: Option<&str>,
    action: LabelsCmd,
) -> anyhow::Result<()> {
    match action {
        LabelsCmd::List => print_json(&service.list_labels(account)?),
        LabelsCmd::Create {
            name,
            text_color,
            background_color,
        } => {
            let color = LabelColor::from_parts(text_color.as_deref(), background_color.as_deref())?;
            let label = NewLabel::new(name)?.with_color(color);
            print_json(&service.create_label(account, &label)?)
        }
        LabelsCmd::Edit {
            id,
            name,
            text_color,
            background_color,
        } => {
            let update = LabelUpdate {
                name,
                color: LabelColor::from_parts(text_color.as_deref(), background_color.as_deref())?,
            };
            print_json(&service.update_label(account, &LabelId::new(id), &update)?)
        }
    }
}

pub fn modify(
    service: &mut MailService,
    account: Option<&str>,
    args: ModifyArgs,
) -> anyhow::Result<()> {
    let request = ModifyRequest {
        thread_ids: thread_ids(&args.thread_ids),
        add: args.add,
        remove: args.remove,
        allow_dangerous: args.allow_dangerous,
    };
    let outcomes = service.modify_labels(account, &request)?;
    report_outcomes(&outcomes)
}

pub fn archive(
    service: &mut MailService,
    account: Option<&str>,
    ids: &[String],
) -> anyhow::Result<()> {
    let outcomes = service.archive(account, &thread_ids(ids))?;
    report_outcomes(&outcomes)
}

pub fn attachment(
    service: &mut MailService,
    account: Option<&str>,
    args: AttachmentArgs,
) -> anyhow::Result<()> {
    let saved = service.download_attachment(
        account,
        &MessageId::new(args.message_id),
        &args.attachment_id,
        args.filename.as_deref(),
    )?;
    print_json(&saved)
}

pub fn urls(service: &MailService, account: Option<&str>, ids: &[String]) -> anyhow::Result<()> {
    let ids = thread_ids(ids);
    let links: Vec<ThreadLink> = ids
        .iter()
        .cloned()
        .zip(service.web_urls(account, &ids))
        .map(|(thread_id, url)| ThreadLink { thread_id, url })
        .collect();
    print_json(&links)
}

pub fn send(service: &MailService, account: Option<&str>) -> anyhow::Result<()> {
    service.send(account)?;
    Ok(())
}

pub fn delete(service: &MailService, account: Option<&str>, ids: &[String]) -> anyhow::Result<()> {
    service.delete(account, &thread_ids(ids))?;
    Ok(())
}

fn thread_ids(ids: &[String]) -> Vec<ThreadId> {
    ids.iter().map(ThreadId::new).collect()
}

/// Print per-thread outcomes; any failure makes the command fail after printing
fn report_outcomes(outcomes: &[ThreadOutcome]) -> anyhow::Result<()> {
    print_json(outcomes)?;
    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if failed > 0 {
        bail!("{failed} of {} thread(s) failed", outcomes.len());
    }
    Ok(())
}
