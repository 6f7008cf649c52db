//! Review Workflows
//!
//! Status machines for technical reports (laudos) and citizen notifications
//! (notificações). Transitions are checked against the acting role; every
//! notification transition appends an audit entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::TreeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Gestor,
    Tecnico,
    Cidadao,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("role {role:?} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("cannot {action} from status {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("{user} is not the author of this report")]
    NotAuthor { user: String },
}

fn forbidden(role: Role, action: &'static str) -> WorkflowError {
    WorkflowError::Forbidden { role, action }
}

// ============================================================================
// Laudos
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaudoStatus {
    Rascunho,
    Pendente,
    Aprovado,
    Rejeitado,
}

/// Technical report about one tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Laudo {
    pub tree_id: TreeId,
    pub author: String,
    pub author_role: Role,
    pub text: String,
    pub status: LaudoStatus,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Laudo {
    /// New report. Reports written by a manager need no review and start
    /// approved; a technician's report starts pending.
    pub fn submit(tree_id: TreeId, author: &str, role: Role, text: &str) -> Result<Self, WorkflowError> {
        let status = match role {
            Role::Gestor => LaudoStatus::Aprovado,
            Role::Tecnico => LaudoStatus::Pendente,
            Role::Cidadao => return Err(forbidden(role, "submit a report")),
        };
        let now = Utc::now();
        Ok(Laudo {
            tree_id,
            author: author.to_string(),
            author_role: role,
            text: text.to_string(),
            status,
            reviewed_by: (role == Role::Gestor).then(|| author.to_string()),
            review_note: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Unsubmitted report kept by its author
    pub fn draft(tree_id: TreeId, author: &str, role: Role, text: &str) -> Result<Self, WorkflowError> {
        let mut laudo = Laudo::submit(tree_id, author, role, text)?;
        laudo.status = LaudoStatus::Rascunho;
        laudo.reviewed_by = None;
        Ok(laudo)
    }

    /// Author edit. Approved reports are frozen; any other edit sends the
    /// report back for review.
    pub fn edit(&mut self, editor: &str, text: &str) -> Result<(), WorkflowError> {
        if editor != self.author {
            return Err(WorkflowError::NotAuthor { user: editor.to_string() });
        }
        if self.status == LaudoStatus::Aprovado {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", self.status),
                action: "edit",
            });
        }
        self.text = text.to_string();
        self.status = LaudoStatus::Pendente;
        self.review_note = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Authors may delete their own report until it is approved
    pub fn check_delete(&self, user: &str) -> Result<(), WorkflowError> {
        if user != self.author {
            return Err(WorkflowError::NotAuthor { user: user.to_string() });
        }
        if self.status == LaudoStatus::Aprovado {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", self.status),
                action: "delete",
            });
        }
        Ok(())
    }

    fn review(
        &mut self,
        reviewer: &str,
        role: Role,
        note: Option<&str>,
        outcome: LaudoStatus,
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        if role != Role::Gestor {
            return Err(forbidden(role, action));
        }
        if self.status != LaudoStatus::Pendente {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", self.status),
                action,
            });
        }
        self.status = outcome;
        self.reviewed_by = Some(reviewer.to_string());
        self.review_note = note.map(str::to_string);
        self.updated_at = Utc::now();
        tracing::info!("Laudo for tree {} {:?} by {}", self.tree_id, outcome, reviewer);
        Ok(())
    }

    pub fn approve(&mut self, reviewer: &str, role: Role) -> Result<(), WorkflowError> {
        self.review(reviewer, role, None, LaudoStatus::Aprovado, "approve a report")
    }

    pub fn reject(&mut self, reviewer: &str, role: Role, note: &str) -> Result<(), WorkflowError> {
        self.review(reviewer, role, Some(note), LaudoStatus::Rejeitado, "reject a report")
    }
}

// ============================================================================
// Notificações
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificacaoStatus {
    Pendente,
    EmAnalise,
    Resolvida,
    Arquivada,
}

impl NotificacaoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificacaoStatus::Resolvida | NotificacaoStatus::Arquivada)
    }
}

/// Audit entry appended on every notification transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricoNotificacao {
    pub user: String,
    pub action: String,
    pub note: Option<String>,
    pub status: NotificacaoStatus,
    pub timestamp: DateTime<Utc>,
}

/// Citizen report of a problem with a tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notificacao {
    pub tree_id: Option<TreeId>,
    pub reporter: String,
    /// Short category code chosen on the report form (e.g. `R`)
    pub tipo: String,
    pub description: String,
    pub status: NotificacaoStatus,
    pub responsible_technician: Option<String>,
    pub opinion: Option<String>,
    pub history: Vec<HistoricoNotificacao>,
    pub created_at: DateTime<Utc>,
}

impl Notificacao {
    /// Any role may open a notification
    pub fn open(tree_id: Option<TreeId>, reporter: &str, tipo: &str, description: &str) -> Self {
        let mut notificacao = Notificacao {
            tree_id,
            reporter: reporter.to_string(),
            tipo: tipo.to_string(),
            description: description.to_string(),
            status: NotificacaoStatus::Pendente,
            responsible_technician: None,
            opinion: None,
            history: Vec::new(),
            created_at: Utc::now(),
        };
        notificacao.record(reporter, "Notificação criada", None);
        notificacao
    }

    fn record(&mut self, user: &str, action: &str, note: Option<&str>) {
        self.history.push(HistoricoNotificacao {
            user: user.to_string(),
            action: action.to_string(),
            note: note.map(str::to_string),
            status: self.status,
            timestamp: Utc::now(),
        });
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), WorkflowError> {
        if self.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                from: format!("{:?}", self.status),
                action,
            });
        }
        Ok(())
    }

    /// Technician or manager takes the case and records an opinion
    pub fn analyze(&mut self, user: &str, role: Role, opinion: &str) -> Result<(), WorkflowError> {
        if role == Role::Cidadao {
            return Err(forbidden(role, "analyze a notification"));
        }
        self.ensure_open("analyze")?;
        self.status = NotificacaoStatus::EmAnalise;
        self.responsible_technician = Some(user.to_string());
        self.opinion = Some(opinion.to_string());
        self.record(user, "Parecer técnico atualizado", Some(opinion));
        Ok(())
    }

    fn close(
        &mut self,
        user: &str,
        role: Role,
        note: Option<&str>,
        status: NotificacaoStatus,
        action: &'static str,
        label: &str,
    ) -> Result<(), WorkflowError> {
        if role != Role::Gestor {
            return Err(forbidden(role, action));
        }
        self.ensure_open(action)?;
        self.status = status;
        self.record(user, label, note);
        tracing::info!("Notificação {:?} by {}", status, user);
        Ok(())
    }

    pub fn resolve(&mut self, user: &str, role: Role, note: Option<&str>) -> Result<(), WorkflowError> {
        self.close(user, role, note, NotificacaoStatus::Resolvida, "resolve", "Notificação resolvida")
    }

    pub fn archive(&mut self, user: &str, role: Role, note: Option<&str>) -> Result<(), WorkflowError> {
        self.close(user, role, note, NotificacaoStatus::Arquivada, "archive", "Notificação arquivada")
    }
}

/// Notification list filters; `None` matches everything
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotificacaoFilter {
    pub status: Option<NotificacaoStatus>,
    pub tipo: Option<String>,
}

impl NotificacaoFilter {
    pub fn matches(&self, notificacao: &Notificacao) -> bool {
        self.status.map_or(true, |status| notificacao.status == status)
            && self
                .tipo
                .as_deref()
                .map_or(true, |tipo| tipo.is_empty() || notificacao.tipo == tipo)
    }
}

/// Notifications visible to `viewer`, newest first.
///
/// Managers see every notification; technicians see open ones plus those
/// assigned to them. Citizens have no list.
pub fn list_notificacoes<'a>(
    notificacoes: &'a [Notificacao],
    filter: &NotificacaoFilter,
    viewer: &str,
    role: Role,
) -> Result<Vec<&'a Notificacao>, WorkflowError> {
    if role == Role::Cidadao {
        return Err(forbidden(role, "list notifications"));
    }
    let visible = |n: &Notificacao| {
        role == Role::Gestor
            || !n.status.is_terminal()
            || n.responsible_technician.as_deref() == Some(viewer)
    };

    let mut listed: Vec<&Notificacao> = notificacoes
        .iter()
        .filter(|&n| visible(n) && filter.matches(n))
        .collect();
    listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(listed)
}
