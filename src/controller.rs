//! The reconciler feeding the routing table from `IngreSsh` resources.
//!
//! A finalizer guards deletion: it is added before the resource's routes are
//! first published and removed only after the routing table has observed the
//! delete, so a resource can never vanish while its keys still authenticate.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ingressh_k8s_api::{IngreSsh, InvalidResource, FINALIZER};
use ingressh_k8s_index::{RouteId, SharedRoutes};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

const REQUEUE_DELAY: Duration = Duration::from_secs(5);

struct Ctx {
    client: Client,
    routes: SharedRoutes,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("failed to reconcile IngreSsh: {0}")]
    Finalizer(#[from] kube::runtime::finalizer::Error<InvalidResource>),
}

pub(crate) async fn run(client: Client, routes: SharedRoutes, shutdown: CancellationToken) {
    let api = Api::<IngreSsh>::all(client.clone());
    let ctx = Arc::new(Ctx { client, routes });

    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((resource, _)) => {
                    tracing::debug!(name = %resource.name, namespace = ?resource.namespace, "reconciled");
                }
                Err(error) => tracing::warn!(%error, "reconcile failed"),
            }
        })
        .await;
}

async fn reconcile(resource: Arc<IngreSsh>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let namespace = resource.namespace().unwrap_or_default();
    let api: Api<IngreSsh> = Api::namespaced(ctx.client.clone(), &namespace);
    let ctx = ctx.clone();

    finalizer(&api, FINALIZER, resource, |event| async move {
        match event {
            Event::Apply(resource) => {
                let config = resource.access_config()?;
                tracing::info!(
                    name = %config.name,
                    namespace = %config.namespace,
                    "configuring SSH routes for the resource",
                );
                ctx.routes.write().set(config);
                Ok(Action::await_change())
            }
            Event::Cleanup(resource) => {
                let id = RouteId {
                    name: resource.name_any(),
                    namespace: resource.namespace().unwrap_or_default(),
                };
                tracing::info!(
                    name = %id.name,
                    namespace = %id.namespace,
                    "deleting SSH routes for the resource",
                );
                ctx.routes.write().delete(&id);
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(Error::from)
}

fn error_policy(_: Arc<IngreSsh>, error: &Error, _: Arc<Ctx>) -> Action {
    tracing::warn!(%error, "requeueing the resource");
    Action::requeue(REQUEUE_DELAY)
}
