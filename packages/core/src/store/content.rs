//! Projects, notes, and habits.
//!
//! All three follow the uniform optimistic protocol. Project deletion also
//! removes local tasks and notes that reference the project, so no view can
//! render an entity whose project is gone; the matching remote cascade is
//! the backend's responsibility, and the snapshot covers everything removed
//! locally so a failed delete restores all of it.

use super::{Snapshot, StateChange, Store, StoreError};
use crate::backend::Collection;
use crate::models::wire;
use crate::models::{
    EntityId, Habit, HabitFrequency, HabitPatch, Note, NoteDraft, NotePatch, Project, ProjectPatch,
};

impl Store {
    // --- Projects ---

    /// Create a project. Returns its id.
    pub async fn add_project(
        &self,
        name: &str,
        goal: Option<String>,
        color: &str,
    ) -> Result<EntityId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::validation("project name cannot be empty"));
        }
        let user = self.require_user().await?;
        let project = Project::new(name, goal, color, user.id);
        let project_id = project.id.clone();
        let row = wire::project_row(&project);

        {
            let mut state = self.state.write().await;
            state.projects.insert(project_id.clone(), project);
        }
        self.emit(StateChange::Projects);

        self.commit(
            Snapshot::project(&project_id, None),
            self.backend.insert(Collection::Projects, row),
        )
        .await?;
        Ok(project_id)
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        patch: ProjectPatch,
    ) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(project) = state.projects.get_mut(project_id) else {
                return Err(StoreError::not_found("project", project_id));
            };
            let prior = project.clone();
            if let Some(name) = &patch.name {
                project.name = name.clone();
            }
            if let Some(goal) = &patch.goal {
                project.goal = Some(goal.clone());
            }
            if let Some(color) = &patch.color {
                project.color = color.clone();
            }
            if let Some(status) = patch.status {
                project.status = status;
            }
            (prior, project.clone())
        };
        self.emit(StateChange::Projects);

        self.commit(
            Snapshot::project(project_id, Some(prior)),
            self.backend
                .update(Collection::Projects, project_id, wire::project_row(&updated)),
        )
        .await?;
        Ok(())
    }

    /// Delete a project and locally drop every task and note attached to it.
    pub async fn delete_project(&self, project_id: &str) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.state.write().await;
            let Some(prior) = state.projects.remove(project_id) else {
                return Ok(());
            };
            let mut snapshot = Snapshot::project(project_id, Some(prior));

            let task_ids: Vec<EntityId> = state
                .tasks
                .values()
                .filter(|task| task.project_id.as_deref() == Some(project_id))
                .map(|task| task.id.clone())
                .collect();
            for id in task_ids {
                let prior = state.tasks.remove(&id);
                snapshot = snapshot.with_task(id, prior);
            }

            let note_ids: Vec<EntityId> = state
                .notes
                .values()
                .filter(|note| note.project_id.as_deref() == Some(project_id))
                .map(|note| note.id.clone())
                .collect();
            for id in note_ids {
                let prior = state.notes.remove(&id);
                snapshot = snapshot.with_note(id, prior);
            }
            snapshot
        };
        self.emit(StateChange::Projects);
        self.emit(StateChange::Tasks);
        self.emit(StateChange::Notes);

        self.commit(
            snapshot,
            self.backend
                .delete(Collection::Projects, &[project_id.to_owned()]),
        )
        .await?;
        Ok(())
    }

    // --- Notes ---

    /// Create a note. Returns its id.
    pub async fn add_note(&self, draft: NoteDraft) -> Result<EntityId, StoreError> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::validation("note title cannot be empty"));
        }
        let user = self.require_user().await?;
        let note = Note::from_draft(draft, user.id);
        let note_id = note.id.clone();
        let row = wire::note_row(&note);

        {
            let mut state = self.state.write().await;
            state.notes.insert(note_id.clone(), note);
        }
        self.emit(StateChange::Notes);

        self.commit(
            Snapshot::note(&note_id, None),
            self.backend.insert(Collection::Notes, row),
        )
        .await?;
        Ok(note_id)
    }

    pub async fn update_note(&self, note_id: &str, patch: NotePatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(note) = state.notes.get_mut(note_id) else {
                return Err(StoreError::not_found("note", note_id));
            };
            let prior = note.clone();
            if let Some(title) = &patch.title {
                note.title = title.clone();
            }
            if let Some(body) = &patch.body {
                note.body = body.clone();
            }
            if let Some(tags) = &patch.tags {
                note.tags = tags.clone();
            }
            note.updated_at = chrono::Utc::now().timestamp_millis();
            (prior, note.clone())
        };
        self.emit(StateChange::Notes);

        self.commit(
            Snapshot::note(note_id, Some(prior)),
            self.backend
                .update(Collection::Notes, note_id, wire::note_row(&updated)),
        )
        .await?;
        Ok(())
    }

    /// Delete a note. Deleting an absent note is a no-op.
    pub async fn delete_note(&self, note_id: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            state.notes.remove(note_id)
        };
        let Some(prior) = prior else {
            return Ok(());
        };
        self.emit(StateChange::Notes);

        self.commit(
            Snapshot::note(note_id, Some(prior)),
            self.backend.delete(Collection::Notes, &[note_id.to_owned()]),
        )
        .await?;
        Ok(())
    }

    // --- Habits ---

    /// Create a habit. Returns its id.
    pub async fn add_habit(
        &self,
        name: &str,
        frequency: HabitFrequency,
        duration_minutes: u32,
    ) -> Result<EntityId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::validation("habit name cannot be empty"));
        }
        let user = self.require_user().await?;
        let habit = Habit::new(name, frequency, duration_minutes, user.id);
        let habit_id = habit.id.clone();
        let row = wire::habit_row(&habit);

        {
            let mut state = self.state.write().await;
            state.habits.insert(habit_id.clone(), habit);
        }
        self.emit(StateChange::Habits);

        self.commit(
            Snapshot::habit(&habit_id, None),
            self.backend.insert(Collection::Habits, row),
        )
        .await?;
        Ok(habit_id)
    }

    pub async fn update_habit(&self, habit_id: &str, patch: HabitPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let (prior, updated) = {
            let mut state = self.state.write().await;
            let Some(habit) = state.habits.get_mut(habit_id) else {
                return Err(StoreError::not_found("habit", habit_id));
            };
            let prior = habit.clone();
            if let Some(name) = &patch.name {
                habit.name = name.clone();
            }
            if let Some(frequency) = patch.frequency {
                habit.frequency = frequency;
            }
            if let Some(minutes) = patch.duration_minutes {
                habit.duration_minutes = minutes;
            }
            if let Some(priority) = patch.priority {
                habit.priority = priority;
            }
            if let Some(color) = &patch.color {
                habit.color = Some(color.clone());
            }
            (prior, habit.clone())
        };
        self.emit(StateChange::Habits);

        self.commit(
            Snapshot::habit(habit_id, Some(prior)),
            self.backend
                .update(Collection::Habits, habit_id, wire::habit_row(&updated)),
        )
        .await?;
        Ok(())
    }

    /// Delete a habit. Deleting an absent habit is a no-op.
    pub async fn delete_habit(&self, habit_id: &str) -> Result<(), StoreError> {
        let prior = {
            let mut state = self.state.write().await;
            state.habits.remove(habit_id)
        };
        let Some(prior) = prior else {
            return Ok(());
        };
        self.emit(StateChange::Habits);

        self.commit(
            Snapshot::habit(habit_id, Some(prior)),
            self.backend
                .delete(Collection::Habits, &[habit_id.to_owned()]),
        )
        .await?;
        Ok(())
    }
}
