//! Kanban board state: columns, todos in column order, and optimistic moves.

use color_eyre::Result;

use crate::api::api_types::TodoUpdate;
use crate::api::keys;
use crate::api::types::{sort_todos, KanbanColumn, Todo};
use crate::api::RemoteApi;
use crate::event::Notifier;
use crate::mutation::{MutationCoordinator, MutationState};
use crate::query::QueryObserver;

/// A column with its todos in board order
#[derive(Debug, Clone, PartialEq)]
pub struct BoardColumn {
  pub column: KanbanColumn,
  pub todos: Vec<Todo>,
}

/// Group todos under their columns, each column sorted by order then id.
///
/// Todos without a column, or pointing at an unknown one, land in the first
/// column. With no columns at all the board is empty.
pub fn group_todos(columns: &[KanbanColumn], todos: &[Todo]) -> Vec<BoardColumn> {
  let mut board: Vec<BoardColumn> = columns
    .iter()
    .map(|column| BoardColumn {
      column: column.clone(),
      todos: Vec::new(),
    })
    .collect();
  if board.is_empty() {
    return board;
  }

  for todo in todos {
    let index = todo
      .column_id
      .and_then(|id| board.iter().position(|c| c.column.id == id))
      .unwrap_or(0);
    board[index].todos.push(todo.clone());
  }
  for column in &mut board {
    sort_todos(&mut column.todos);
  }
  board
}

/// Order value that places a todo at `index` among `neighbours` (already in
/// board order, not including the todo being placed).
pub fn order_at(neighbours: &[Todo], index: usize) -> f64 {
  let index = index.min(neighbours.len());
  let before = index.checked_sub(1).and_then(|i| neighbours.get(i));
  match (before, neighbours.get(index)) {
    (None, None) => 0.0,
    (Some(prev), None) => prev.order + 1.0,
    (None, Some(next)) => next.order - 1.0,
    (Some(prev), Some(next)) => (prev.order + next.order) / 2.0,
  }
}

/// Board hook: observes `todos` and `kanban/columns`, mutates todos optimistically.
pub struct TodoBoard<R: RemoteApi> {
  api: R,
  mutations: MutationCoordinator,
  notifier: Notifier,
  todos: QueryObserver<Vec<Todo>>,
  columns: QueryObserver<Vec<KanbanColumn>>,
}

impl<R: RemoteApi> TodoBoard<R> {
  pub fn new(api: R, mutations: MutationCoordinator, notifier: Notifier) -> Self {
    let cache = mutations.cache().clone();

    let todos_api = api.clone();
    let todos = QueryObserver::new(&cache, keys::todos(), move || {
      let api = todos_api.clone();
      async move { api.list_todos().await }
    });

    let columns_api = api.clone();
    let columns = QueryObserver::new(&cache, keys::columns(), move || {
      let api = columns_api.clone();
      async move { api.list_columns().await }
    });

    Self {
      api,
      mutations,
      notifier,
      todos,
      columns,
    }
  }

  /// Fetch (or serve fresh from cache) todos and columns.
  pub async fn load(&self) -> Result<Vec<BoardColumn>> {
    let (todos, columns) = tokio::try_join!(self.todos.fetch(), self.columns.fetch())?;
    Ok(group_todos(&columns.data, &todos.data))
  }

  /// The board as currently cached, optimistic patches included.
  pub fn board(&self) -> Vec<BoardColumn> {
    group_todos(
      &self.columns.data().unwrap_or_default(),
      &self.todos.data().unwrap_or_default(),
    )
  }

  fn find_todo(&self, todo_id: i64) -> Option<Todo> {
    self
      .todos
      .data()
      .unwrap_or_default()
      .into_iter()
      .find(|t| t.id == todo_id)
  }

  /// Move a todo to `column_id`, at `index` within it (end of column if `None`).
  pub async fn move_todo(&self, todo_id: i64, column_id: i64, index: Option<usize>) -> MutationState {
    let Some(todo) = self.find_todo(todo_id) else {
      self
        .notifier
        .error(format!("Todo {} is not on the board", todo_id));
      return MutationState::Idle;
    };
    let board = self.board();
    let Some(target) = board.iter().find(|c| c.column.id == column_id) else {
      self
        .notifier
        .error(format!("Column {} does not exist", column_id));
      return MutationState::Idle;
    };

    let neighbours: Vec<Todo> = target
      .todos
      .iter()
      .filter(|t| t.id != todo_id)
      .cloned()
      .collect();
    let order = order_at(&neighbours, index.unwrap_or(neighbours.len()));
    let update = TodoUpdate {
      column_id: Some(column_id),
      completed: todo.completed,
      order,
    };

    self
      .update_todo(format!("Moving todo {}", todo_id), todo_id, update)
      .await
  }

  /// Flip a todo's completed flag.
  pub async fn toggle_completed(&self, todo_id: i64) -> MutationState {
    let Some(todo) = self.find_todo(todo_id) else {
      self
        .notifier
        .error(format!("Todo {} is not on the board", todo_id));
      return MutationState::Idle;
    };
    let update = TodoUpdate {
      column_id: todo.column_id,
      completed: !todo.completed,
      order: todo.order,
    };

    self
      .update_todo(format!("Updating todo {}", todo_id), todo_id, update)
      .await
  }

  async fn update_todo(&self, label: String, todo_id: i64, update: TodoUpdate) -> MutationState {
    let key = keys::todos();
    let (column_id, completed, order) = (update.column_id, update.completed, update.order);
    let api = self.api.clone();

    self
      .mutations
      .mutate(
        &label,
        &[key.clone()],
        |cache| {
          cache.set_as::<Vec<Todo>>(&key, |mut todos| {
            if let Some(todo) = todos.iter_mut().find(|t| t.id == todo_id) {
              todo.column_id = column_id;
              todo.completed = completed;
              todo.order = order;
            }
            todos
          })
        },
        async move { api.update_todo(todo_id, update).await },
      )
      .await
      .state()
  }
}
