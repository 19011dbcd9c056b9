use color_eyre::Result;

use crate::api::api_types::SettingsUpdate;
use crate::api::keys;
use crate::api::types::Settings;
use crate::api::RemoteApi;
use crate::mutation::{MutationCoordinator, MutationState};
use crate::query::QueryObserver;

/// User settings hook: fetch and optimistic update.
pub struct SettingsStore<R: RemoteApi> {
  api: R,
  mutations: MutationCoordinator,
  settings: QueryObserver<Settings>,
}

impl<R: RemoteApi> SettingsStore<R> {
  pub fn new(api: R, mutations: MutationCoordinator) -> Self {
    let fetch_api = api.clone();
    let settings = QueryObserver::new(mutations.cache(), keys::settings(), move || {
      let api = fetch_api.clone();
      async move { api.get_settings().await }
    });

    Self {
      api,
      mutations,
      settings,
    }
  }

  pub async fn load(&self) -> Result<Settings> {
    Ok(self.settings.fetch().await?.data)
  }

  pub fn settings(&self) -> Option<Settings> {
    self.settings.data()
  }

  /// Apply `update` locally, then send it. A rejected update (`{ok: false}`)
  /// restores the previous settings and raises a notice.
  pub async fn update(&self, update: SettingsUpdate) -> MutationState {
    if update.is_empty() {
      return MutationState::Idle;
    }

    let key = keys::settings();
    let patch = update.clone();
    let api = self.api.clone();

    self
      .mutations
      .mutate(
        "Updating settings",
        &[key.clone()],
        |cache| {
          cache.set_as::<Settings>(&key, |mut settings| {
            patch.apply_to(&mut settings);
            settings
          })
        },
        async move { api.update_settings(update).await },
      )
      .await
      .state()
  }
}
