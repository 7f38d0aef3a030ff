//! Eager loading over a result set
//!
//! All lookups run concurrently against the same parents; attachments are only
//! applied once every lookup succeeded, so a failing relation leaves the
//! parents untouched.

use futures::future::try_join_all;
use tracing::debug;

use super::descriptor::Relation;
use crate::context::RequestContext;
use crate::model::Model;
use crate::repository::RepositoryResult;

/// Resolve `relations` onto `parents`
pub async fn load<'r, I>(
    ctx: &RequestContext,
    relations: I,
    parents: &mut [Model],
) -> RepositoryResult<()>
where
    I: IntoIterator<Item = &'r Relation>,
{
    let relations: Vec<&Relation> = relations.into_iter().collect();
    if relations.is_empty() || parents.is_empty() {
        return Ok(());
    }
    debug!(
        relations = ?relations.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        parents = parents.len(),
        "eager load"
    );

    let attachments = {
        let parents: &[Model] = parents;
        try_join_all(relations.iter().map(|relation| relation.lookup(ctx, parents))).await?
    };
    for attachment in attachments {
        attachment.apply(parents);
    }
    Ok(())
}

/// Resolve only the relations flagged `eager`
pub async fn load_eager(
    ctx: &RequestContext,
    relations: &[Relation],
    parents: &mut [Model],
) -> RepositoryResult<()> {
    load(ctx, relations.iter().filter(|r| r.eager), parents).await
}
