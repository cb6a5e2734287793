//! Line-oriented terminal front-end.
//!
//! Hosts the form, editor, and banner components over a session store and
//! synchronizer. Input lines, live change notices, and session changes are
//! multiplexed in one loop so output never interleaves mid-line.

use std::io::Write;
use std::sync::Arc;

use ideavault_client::{
    AppliedChange, ChangeAction, IdeaDraft, IdeaEditor, IdeaForm, IdeaSynchronizer, SessionBanner,
    SessionStore, SyncPhase, VaultError,
};
use ideavault_types::{Idea, format_tags};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::command::{self, Command, DraftField, HELP};

const REAUTH_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell<W> {
    session: Arc<SessionStore>,
    sync: IdeaSynchronizer,
    form: IdeaForm,
    /// Idea opened with `edit`, if any.
    editor: Option<IdeaEditor>,
    /// Last banner printed, so session changes are announced once.
    banner: Option<SessionBanner>,
    /// Idea awaiting a `yes` before it is deleted. Any other input disarms it.
    pending_delete: Option<Idea>,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(sync: IdeaSynchronizer, out: W) -> Self {
        Self {
            session: sync.session().clone(),
            sync,
            form: IdeaForm::new(),
            editor: None,
            banner: None,
            pending_delete: None,
            out,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Read commands until `quit` or end of input.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> std::io::Result<()> {
        let mut lines = input.lines();
        let mut changes = self.sync.changes();
        let mut identity = self.session.watch();
        identity.borrow_and_update();

        self.show_banner()?;
        self.prompt()?;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if self.handle_line(&line).await? == Flow::Quit {
                        break;
                    }
                    self.prompt()?;
                }
                change = changes.recv() => match change {
                    Ok(change) => self.notice(&change)?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed change notices");
                        writeln!(self.out, "(list changed; use 'list' to see it)")?;
                    }
                    Err(RecvError::Closed) => break,
                },
                Ok(()) = identity.changed() => {
                    identity.borrow_and_update();
                    if !self.session.is_authenticated() {
                        self.editor = None;
                        self.pending_delete = None;
                    }
                    self.show_banner()?;
                }
            }
        }
        self.out.flush()
    }

    /// Parse and execute one input line.
    pub async fn handle_line(&mut self, line: &str) -> std::io::Result<Flow> {
        match command::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(err) => {
                debug!(%err, "Rejected input");
                self.pending_delete = None;
                writeln!(self.out, "{err}")?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn execute(&mut self, command: Command) -> std::io::Result<Flow> {
        let pending_delete = self.pending_delete.take();
        match command {
            Command::Login { email, password } => match self.session.login(&email, &password).await {
                Ok(_) => self.show_banner()?,
                Err(err) => self.report(&err, None)?,
            },
            Command::Register { email, password, password_confirm } => {
                match self.session.register(&email, &password, &password_confirm).await {
                    Ok(_) => self.show_banner()?,
                    Err(err) => self.report(&err, None)?,
                }
            }
            Command::Logout => {
                self.session.logout();
                self.editor = None;
                self.form.clear();
                self.show_banner()?;
            }
            Command::Whoami => match self.session.current() {
                Some(identity) => writeln!(self.out, "{identity}")?,
                None => writeln!(self.out, "{}", SessionBanner::SignedOut)?,
            },
            Command::List => self.render_list()?,
            Command::Refresh => match self.sync.fetch_all().await {
                Ok(_) => self.render_list()?,
                Err(err) => self.report(&err, None)?,
            },
            Command::Add { title, description, tags } => {
                self.form.draft = IdeaDraft { title, description, tags };
                self.submit_form().await?;
            }
            Command::Retry => {
                if self.form.restore_last() {
                    self.submit_form().await?;
                } else {
                    writeln!(self.out, "Nothing to retry.")?;
                }
            }
            Command::Edit(position) => {
                if let Some(idea) = self.idea_at(position)? {
                    let mut editor = IdeaEditor::new(idea);
                    editor.begin_edit();
                    self.editor = Some(editor);
                    self.render_draft()?;
                }
            }
            Command::Set { field, text } => {
                let Some(draft) = self.editor.as_mut().and_then(IdeaEditor::draft_mut) else {
                    writeln!(self.out, "Not editing. Use 'edit <n>' first.")?;
                    return Ok(Flow::Continue);
                };
                match field {
                    DraftField::Title => draft.title = text,
                    DraftField::Description => draft.description = text,
                    DraftField::Tags => draft.tags = text,
                }
                self.render_draft()?;
            }
            Command::Save => {
                let Some(mut editor) = self.editor.take() else {
                    writeln!(self.out, "Not editing. Use 'edit <n>' first.")?;
                    return Ok(Flow::Continue);
                };
                match editor.save(&self.sync).await {
                    Ok(Some(idea)) => writeln!(self.out, "Saved \"{}\".", idea.title)?,
                    Ok(None) => {}
                    Err(err) => self.report(&err, None)?,
                }
            }
            Command::Cancel => match self.editor.take() {
                Some(mut editor) => {
                    editor.cancel();
                    writeln!(self.out, "Edit of \"{}\" cancelled.", editor.idea().title)?;
                }
                None => writeln!(self.out, "Not editing.")?,
            },
            Command::Delete { position, confirmed } => {
                if let Some(idea) = self.idea_at(position)? {
                    if confirmed {
                        self.delete(idea).await?;
                    } else {
                        writeln!(self.out, "Delete \"{}\"? Type 'yes' to confirm.", idea.title)?;
                        self.pending_delete = Some(idea);
                    }
                }
            }
            Command::Confirm(answer) => match (pending_delete, answer) {
                (Some(idea), true) => self.delete(idea).await?,
                (Some(idea), false) => writeln!(self.out, "Kept \"{}\".", idea.title)?,
                (None, _) => writeln!(self.out, "Nothing to confirm.")?,
            },
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Nothing => {}
        }
        Ok(Flow::Continue)
    }

    async fn delete(&mut self, idea: Idea) -> std::io::Result<()> {
        let viewer = IdeaEditor::new(idea);
        match viewer.delete(&self.sync).await {
            Ok(()) => writeln!(self.out, "Deleted \"{}\".", viewer.idea().title),
            Err(err) => self.report(&err, None),
        }
    }

    async fn submit_form(&mut self) -> std::io::Result<()> {
        match self.form.submit(&self.sync).await {
            Ok(idea) => writeln!(self.out, "Added \"{}\".", idea.title),
            Err(err) => {
                let message = self.form.error().map(str::to_string);
                self.report(&err, message)
            }
        }
    }

    /// Print a failed operation. An authorization failure ends the session.
    fn report(&mut self, err: &VaultError, message: Option<String>) -> std::io::Result<()> {
        let message = message.unwrap_or_else(|| err.to_string());
        writeln!(self.out, "Error: {message}")?;
        if err.requires_reauth() {
            self.session.logout();
            self.editor = None;
            writeln!(self.out, "{REAUTH_MESSAGE}")?;
            self.show_banner()?;
        }
        Ok(())
    }

    /// Print a live change to the list.
    fn notice(&mut self, change: &AppliedChange) -> std::io::Result<()> {
        let record = &change.record;
        if let Some(editor) = &mut self.editor
            && editor.idea().id == record.id
        {
            match change.action {
                ChangeAction::Updated => editor.refresh(record.clone()),
                ChangeAction::Deleted => {
                    self.editor = None;
                    writeln!(self.out, "(the idea you were editing was deleted)")?;
                }
                ChangeAction::Created => {}
            }
        }
        if change.action == ChangeAction::Deleted
            && self.pending_delete.as_ref().is_some_and(|idea| idea.id == record.id)
        {
            self.pending_delete = None;
        }
        writeln!(self.out, "* {} #{}: {}", change.action, change.index + 1, record.title)
    }

    /// The idea at a 1-based list position, or a message saying there is none.
    fn idea_at(&mut self, position: usize) -> std::io::Result<Option<Idea>> {
        let idea = self.sync.ideas().into_iter().nth(position - 1);
        if idea.is_none() {
            writeln!(self.out, "No idea at position {position}.")?;
        }
        Ok(idea)
    }

    fn show_banner(&mut self) -> std::io::Result<()> {
        let banner = SessionBanner::from_identity(self.session.current().as_ref());
        if self.banner.as_ref() == Some(&banner) {
            return Ok(());
        }
        writeln!(self.out, "{banner}  [{}]", banner.actions().join(" | "))?;
        self.banner = Some(banner);
        Ok(())
    }

    fn render_list(&mut self) -> std::io::Result<()> {
        let snapshot = self.sync.snapshot();
        if snapshot.owner.is_none() {
            return writeln!(self.out, "Log in to see your ideas.");
        }

        writeln!(self.out, "Your Startup Ideas")?;
        if snapshot.ideas.is_empty() {
            if snapshot.phase == SyncPhase::Loading {
                writeln!(self.out, "  Loading ideas...")?;
            } else {
                writeln!(self.out, "  No ideas yet. Add your first idea!")?;
            }
        }
        for (i, idea) in snapshot.ideas.iter().enumerate() {
            writeln!(self.out, "  {}. {}", i + 1, idea.title)?;
            writeln!(self.out, "     {}", idea.description)?;
            if !idea.tags.is_empty() {
                writeln!(self.out, "     tags: {}", format_tags(&idea.tags))?;
            }
        }
        if let Some(message) = snapshot.error_message() {
            writeln!(self.out, "  ! {message}")?;
        }
        Ok(())
    }

    fn render_draft(&mut self) -> std::io::Result<()> {
        let Some(draft) = self.editor.as_ref().and_then(IdeaEditor::draft) else {
            return Ok(());
        };
        writeln!(self.out, "Editing:")?;
        writeln!(self.out, "  title: {}", draft.title)?;
        writeln!(self.out, "  desc:  {}", draft.description)?;
        writeln!(self.out, "  tags:  {}", draft.tags)?;
        writeln!(self.out, "Use 'set title|desc|tags <text>', then 'save' or 'cancel'.")
    }

    fn prompt(&mut self) -> std::io::Result<()> {
        write!(self.out, "> ")?;
        self.out.flush()
    }
}
