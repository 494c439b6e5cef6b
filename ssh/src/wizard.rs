//! The interactive target selector: a three-stage wizard (namespace → pod →
//! container) rendered over the SSH channel.
//!
//! The wizard itself is an I/O-free state machine: the session feeds it key
//! events and window sizes and writes whatever [`Wizard::view`] renders. A
//! stage with exactly one option is entered and left in the same step, so an
//! unambiguous target can complete before any event is processed.

use crate::authz::{Authorizer, AuthzError, PodAccess};
use crate::keys::Key;
use ingressh_core::SshTarget;
use ingressh_k8s_client::ClusterClient;

const DEFAULT_LIST_WIDTH: u16 = 60;
const SELECTED: &str = "\x1b[38;5;170m";
const RESET: &str = "\x1b[0m";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Namespace,
    Pod,
    Container,
}

/// What the session loop should do after a key was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Nothing changed on screen.
    Idle,
    Redraw,
    /// Selection finished; the result may still be incomplete if the user
    /// quit.
    Done,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StageError {
    #[error("{0}")]
    Empty(String),

    #[error(transparent)]
    Authz(#[from] AuthzError),
}

#[derive(Debug, Default)]
struct ListScreen {
    title: String,
    items: Vec<String>,
    selected: usize,
}

impl ListScreen {
    fn new(title: String, items: Vec<String>) -> Self {
        Self {
            title,
            items,
            selected: 0,
        }
    }

    fn selected_item(&self) -> &str {
        self.items
            .get(self.selected)
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn move_down(&mut self) {
        if self.selected + 1 < self.items.len() {
            self.selected += 1;
        }
    }

    fn render(&self, out: &mut String, width: u16) {
        let width = width.max(10) as usize;
        out.push_str("  ");
        out.push_str(truncated(&self.title, width));
        out.push_str("\r\n\r\n");
        for (index, item) in self.items.iter().enumerate() {
            let line = format!("{}. {}", index + 1, item);
            if index == self.selected {
                out.push_str(SELECTED);
                out.push_str("  > ");
                out.push_str(truncated(&line, width));
                out.push_str(RESET);
            } else {
                out.push_str("    ");
                out.push_str(truncated(&line, width));
            }
            out.push_str("\r\n");
        }
        out.push_str("\r\n  up/down select, enter confirm, esc back, ctrl-c quit\r\n");
    }
}

fn truncated(text: &str, width: usize) -> &str {
    match text.char_indices().nth(width) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

pub(crate) struct Wizard<'a, C> {
    authz: &'a Authorizer<'a, C>,
    hint: &'a SshTarget,
    width: u16,

    stage: Stage,
    no_way: Option<String>,

    namespaces: ListScreen,
    pods: ListScreen,
    pod_access: Vec<PodAccess>,
    containers: ListScreen,

    choice_namespace: String,
    choice_pod: String,
    choice_access: Option<PodAccess>,
    choice_container: String,

    quitting: bool,
}

impl<'a, C: ClusterClient + Sync> Wizard<'a, C> {
    pub(crate) fn new(
        authz: &'a Authorizer<'a, C>,
        hint: &'a SshTarget,
        width: Option<u16>,
    ) -> Self {
        Self {
            authz,
            hint,
            width: width.unwrap_or(DEFAULT_LIST_WIDTH),
            stage: Stage::Namespace,
            no_way: None,
            namespaces: ListScreen::default(),
            pods: ListScreen::default(),
            pod_access: Vec::new(),
            containers: ListScreen::default(),
            choice_namespace: String::new(),
            choice_pod: String::new(),
            choice_access: None,
            choice_container: String::new(),
            quitting: false,
        }
    }

    /// Populates the namespace screen, auto-advancing through every stage
    /// that has exactly one option. Unlike mid-wizard emptiness, having
    /// nothing to offer up front is fatal to the selection.
    pub(crate) async fn start(&mut self) -> Result<(), StageError> {
        let mut namespaces = self.authz.namespaces(&self.hint.namespace).await?;
        if namespaces.is_empty() {
            return Err(StageError::Empty("No authorized namespaces".to_string()));
        }
        namespaces.sort();
        let single = namespaces.len() == 1;
        self.namespaces = ListScreen::new("Select the namespace".to_string(), namespaces);
        self.stage = Stage::Namespace;
        if single {
            return self.enter_pod_stage().await;
        }
        Ok(())
    }

    /// True once the cascade of singletons produced a complete target and the
    /// event loop can be skipped entirely.
    pub(crate) fn is_settled(&self) -> bool {
        self.result().0.is_complete()
    }

    pub(crate) async fn handle_key(&mut self, key: Key) -> Step {
        if key == Key::CtrlC {
            self.quitting = true;
            return Step::Done;
        }

        if self.no_way.is_some() {
            // The "nothing here" screen stays on the current list; any key
            // returns to it.
            self.no_way = None;
            return Step::Redraw;
        }

        match key {
            Key::Enter => {
                let entered = match self.stage {
                    Stage::Namespace => self.enter_pod_stage().await,
                    Stage::Pod => self.enter_container_stage(),
                    Stage::Container => {
                        self.choice_container = self.containers.selected_item().to_string();
                        return Step::Done;
                    }
                };
                match entered {
                    // A cascade of singletons may have settled the target.
                    Ok(()) if self.quitting || !self.choice_container.is_empty() => Step::Done,
                    Ok(()) => Step::Redraw,
                    Err(error) => {
                        self.no_way = Some(error.to_string());
                        Step::Redraw
                    }
                }
            }
            Key::Esc => match self.stage {
                Stage::Namespace => {
                    self.quitting = true;
                    Step::Done
                }
                Stage::Pod => {
                    self.stage = Stage::Namespace;
                    self.choice_namespace.clear();
                    Step::Redraw
                }
                Stage::Container => {
                    self.stage = Stage::Pod;
                    self.choice_pod.clear();
                    Step::Redraw
                }
            },
            Key::Up | Key::Char('k') => {
                self.active_list_mut().move_up();
                Step::Redraw
            }
            Key::Down | Key::Char('j') => {
                self.active_list_mut().move_down();
                Step::Redraw
            }
            _ => Step::Idle,
        }
    }

    pub(crate) fn set_width(&mut self, width: u16) {
        self.width = width;
    }

    pub(crate) fn view(&self) -> String {
        if let Some(message) = &self.no_way {
            return format!(
                "No authorized objects: {message}\r\n\r\nPress any key to select a different option\r\n",
            );
        }
        if !self.choice_container.is_empty() {
            return format!(
                "Proceed with {}/{}/{}...\r\n",
                self.choice_namespace, self.choice_pod, self.choice_container,
            );
        }
        if self.quitting {
            return "SSH session setup has been cancelled\r\n".to_string();
        }

        let mut out = String::from("\r\n");
        self.active_list().render(&mut out, self.width);
        out
    }

    pub(crate) fn result(&self) -> (SshTarget, Option<PodAccess>) {
        let target = SshTarget {
            namespace: self.choice_namespace.clone(),
            pod: self.choice_pod.clone(),
            container: self.choice_container.clone(),
        };
        (target, self.choice_access.clone())
    }

    fn active_list(&self) -> &ListScreen {
        match self.stage {
            Stage::Namespace => &self.namespaces,
            Stage::Pod => &self.pods,
            Stage::Container => &self.containers,
        }
    }

    fn active_list_mut(&mut self) -> &mut ListScreen {
        match self.stage {
            Stage::Namespace => &mut self.namespaces,
            Stage::Pod => &mut self.pods,
            Stage::Container => &mut self.containers,
        }
    }

    async fn enter_pod_stage(&mut self) -> Result<(), StageError> {
        let namespace = self.namespaces.selected_item().to_string();
        let mut access = self.authz.pods(&namespace, &self.hint.pod).await?;
        if access.is_empty() {
            return Err(StageError::Empty(format!(
                "No authorized pods in ns {namespace}"
            )));
        }
        access.sort_by(|a, b| a.pod.metadata.name.cmp(&b.pod.metadata.name));

        self.choice_namespace = namespace.clone();
        let items = access
            .iter()
            .map(|a| a.pod.metadata.name.clone().unwrap_or_default())
            .collect();
        self.pods = ListScreen::new(format!("Select a pod in the ns '{namespace}'"), items);
        self.pod_access = access;
        self.stage = Stage::Pod;

        // When there is actually no choice, advance to the next stage.
        if self.pod_access.len() == 1 {
            self.pods.selected = 0;
            return self.enter_container_stage();
        }
        Ok(())
    }

    fn enter_container_stage(&mut self) -> Result<(), StageError> {
        let Some(access) = self.pod_access.get(self.pods.selected).cloned() else {
            return Err(StageError::Empty("No authorized pods".to_string()));
        };
        let pod_name = access.pod.metadata.name.clone().unwrap_or_default();
        let mut containers =
            self.authz
                .containers(&access.pod, &access.config.containers, &self.hint.container)?;
        if containers.is_empty() {
            return Err(StageError::Empty(format!(
                "No authorized containers in pod {pod_name}"
            )));
        }
        containers.sort();

        self.choice_pod = pod_name;
        self.choice_access = Some(access);
        let single = containers.len() == 1;
        let first = containers.first().cloned().unwrap_or_default();
        self.containers = ListScreen::new(
            format!(
                "Select a container in {}/{}",
                self.choice_namespace, self.choice_pod
            ),
            containers,
        );
        self.stage = Stage::Container;

        if single {
            self.containers.selected = 0;
            self.choice_container = first;
            self.quitting = true;
        }
        Ok(())
    }
}
