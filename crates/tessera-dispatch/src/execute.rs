//! EXECUTE: by-name method calls on a model hosted by a worker.

use tessera_config::Config;
use tessera_tiles::{GeometryEdit, ItemId, WorkerRuntime};
use tracing::debug;

use crate::error::DispatchError;
use crate::protocol::{ExecuteArg, MemoryUsage, Reply};
use crate::worker::ModelState;

pub const SET_VISIBLE: &str = "setVisible";
pub const SET_HIGHLIGHT: &str = "setHighlight";
pub const RESET_HIGHLIGHT: &str = "resetHighlight";
pub const GET_VISIBLE_ITEMS: &str = "getVisibleItems";
pub const GET_ITEMS_WITH_GEOMETRY: &str = "getItemsWithGeometry";
pub const GET_MEMORY_USAGE: &str = "getMemoryUsage";
pub const EDIT_GEOMETRY: &str = "editGeometry";

pub(crate) struct ExecuteContext<'a> {
    pub model: &'a mut ModelState,
    pub runtime: &'a mut WorkerRuntime,
    pub config: &'a Config,
}

type ExecuteFn = fn(&mut ExecuteContext<'_>, &mut ExecuteArgs) -> Result<Reply, DispatchError>;

fn lookup(method: &str) -> Option<ExecuteFn> {
    let found: ExecuteFn = match method {
        SET_VISIBLE => set_visible,
        SET_HIGHLIGHT => set_highlight,
        RESET_HIGHLIGHT => reset_highlight,
        GET_VISIBLE_ITEMS => get_visible_items,
        GET_ITEMS_WITH_GEOMETRY => get_items_with_geometry,
        GET_MEMORY_USAGE => get_memory_usage,
        EDIT_GEOMETRY => edit_geometry,
        _ => return None,
    };
    Some(found)
}

pub(crate) fn execute(
    ctx: &mut ExecuteContext<'_>,
    method: String,
    args: Vec<ExecuteArg>,
) -> Result<Reply, DispatchError> {
    let Some(function) = lookup(&method) else {
        return Err(DispatchError::UnknownMethod(method));
    };
    debug!(%method, args = args.len(), "execute");
    function(ctx, &mut ExecuteArgs { method, values: args })
}

// --- Argument access ---

/// Positional arguments; each accessor takes its value out.
pub(crate) struct ExecuteArgs {
    method: String,
    values: Vec<ExecuteArg>,
}

impl ExecuteArgs {
    fn bad(&self, reason: String) -> DispatchError {
        DispatchError::BadArguments {
            method: self.method.clone(),
            reason,
        }
    }

    fn take(&mut self, index: usize) -> ExecuteArg {
        self.values
            .get_mut(index)
            .map(|value| std::mem::replace(value, ExecuteArg::Null))
            .unwrap_or(ExecuteArg::Null)
    }

    fn items(&mut self, index: usize) -> Result<Vec<ItemId>, DispatchError> {
        match self.take(index) {
            ExecuteArg::Items(items) => Ok(items),
            other => Err(self.bad(format!("argument {index} must be an item list, got {other:?}"))),
        }
    }

    fn optional_items(&mut self, index: usize) -> Result<Option<Vec<ItemId>>, DispatchError> {
        match self.take(index) {
            ExecuteArg::Null => Ok(None),
            ExecuteArg::Items(items) => Ok(Some(items)),
            other => Err(self.bad(format!("argument {index} must be an item list or null, got {other:?}"))),
        }
    }

    fn flag(&mut self, index: usize) -> Result<bool, DispatchError> {
        match self.take(index) {
            ExecuteArg::Bool(flag) => Ok(flag),
            other => Err(self.bad(format!("argument {index} must be a bool, got {other:?}"))),
        }
    }

    fn optional_flag(&mut self, index: usize) -> Result<Option<bool>, DispatchError> {
        match self.take(index) {
            ExecuteArg::Null => Ok(None),
            ExecuteArg::Bool(flag) => Ok(Some(flag)),
            other => Err(self.bad(format!("argument {index} must be a bool or null, got {other:?}"))),
        }
    }

    fn highlight(&mut self, index: usize) -> Result<u16, DispatchError> {
        match self.take(index) {
            ExecuteArg::Int(value) => {
                u16::try_from(value).map_err(|_| self.bad(format!("highlight {value} out of range")))
            }
            other => Err(self.bad(format!("argument {index} must be a highlight id, got {other:?}"))),
        }
    }

    fn edit(&mut self, index: usize) -> Result<GeometryEdit, DispatchError> {
        match self.take(index) {
            ExecuteArg::Edit(edit) => Ok(edit),
            other => Err(self.bad(format!("argument {index} must be a geometry edit, got {other:?}"))),
        }
    }
}

// --- Methods ---

fn set_visible(ctx: &mut ExecuteContext<'_>, args: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    let items = args.items(0)?;
    let visible = args.flag(1)?;
    let changed = ctx.model.items.set_visible(&items, visible);
    if changed > 0 {
        ctx.model.scheduler.invalidate_items();
    }
    Ok(Reply::Count(changed))
}

fn set_highlight(ctx: &mut ExecuteContext<'_>, args: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    let items = args.items(0)?;
    let highlight = args.highlight(1)?;
    let preserve = args
        .optional_flag(2)?
        .unwrap_or(ctx.config.highlight.preserve_original_material);
    let changed = ctx.model.items.set_highlight(&items, highlight, preserve);
    if changed > 0 {
        ctx.model.scheduler.invalidate_items();
    }
    Ok(Reply::Count(changed))
}

fn reset_highlight(ctx: &mut ExecuteContext<'_>, args: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    let items = args.optional_items(0)?;
    let changed = ctx.model.items.reset_highlight(items.as_deref());
    if changed > 0 {
        ctx.model.scheduler.invalidate_items();
    }
    Ok(Reply::Count(changed))
}

fn get_visible_items(ctx: &mut ExecuteContext<'_>, _: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    Ok(Reply::Items(ctx.model.items.visible_items()))
}

fn get_items_with_geometry(ctx: &mut ExecuteContext<'_>, _: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    Ok(Reply::Items(ctx.model.scheduler.items_with_geometry()))
}

fn get_memory_usage(ctx: &mut ExecuteContext<'_>, _: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    Ok(Reply::Memory(MemoryUsage {
        generated: ctx.model.scheduler.generated_bytes(),
        cache: ctx.runtime.cache.used_bytes(),
        items: ctx.model.items.byte_size(),
    }))
}

fn edit_geometry(ctx: &mut ExecuteContext<'_>, args: &mut ExecuteArgs) -> Result<Reply, DispatchError> {
    let edit = args.edit(0)?;
    let item_count = edit
        .upserted
        .iter()
        .map(|s| s.item.0 as usize + 1)
        .max()
        .unwrap_or(0);
    ctx.model.items.ensure(item_count);

    let model = &mut *ctx.model;
    model.scheduler.apply_edit(edit, &model.builders, ctx.runtime)?;
    model.boxes.rebuild(model.scheduler.samples());
    Ok(Reply::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: Vec<ExecuteArg>) -> ExecuteArgs {
        ExecuteArgs {
            method: SET_HIGHLIGHT.into(),
            values,
        }
    }

    #[test]
    fn test_lookup_known_methods() {
        for method in [
            SET_VISIBLE,
            SET_HIGHLIGHT,
            RESET_HIGHLIGHT,
            GET_VISIBLE_ITEMS,
            GET_ITEMS_WITH_GEOMETRY,
            GET_MEMORY_USAGE,
            EDIT_GEOMETRY,
        ] {
            assert!(lookup(method).is_some(), "{method}");
        }
        assert!(lookup("dropTables").is_none());
    }

    #[test]
    fn test_missing_optional_args_read_as_none() {
        let mut args = args(vec![ExecuteArg::Items(vec![ItemId(1)])]);
        assert_eq!(args.items(0).unwrap(), vec![ItemId(1)]);
        assert_eq!(args.optional_flag(2).unwrap(), None);
        assert_eq!(args.optional_items(5).unwrap(), None);
    }

    #[test]
    fn test_wrong_argument_kind() {
        let mut args = args(vec![ExecuteArg::Bool(true), ExecuteArg::Int(70_000)]);
        assert!(matches!(args.items(0), Err(DispatchError::BadArguments { .. })));
        let err = args.highlight(1).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }
}
