//! Bloom filter semi-join: Using_BloomFilter and Select_BloomFilter.
//!
//! `Using_BloomFilter` loads a [`BloomFilter`] from one input and binds it
//! for the duration of its other input, in which `Select_BloomFilter` keeps
//! the rows that probe positive and whose verification lookup finds a
//! match. Both sides hash keys through
//! [`hash_key`](crate::exec::hash_table::hash_key), so a loaded key always
//! probes positive.

use std::sync::Arc;

use hkeydb_core::{Row, RowType, Value};
use tracing::{debug, trace};

use crate::error::{ExecError, ExecResult};
use crate::exec::bindings::{QueryBindings, QueryBindingsCursor, SingletonQueryBindingsCursor};
use crate::exec::bloom::{BloomFilter, DEFAULT_ERROR_RATE};
use crate::exec::collation::CollatorRef;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ChainedInput, Cursor, CursorLifecycle,
    CursorState,
};
use crate::exec::expr::ExpressionRef;
use crate::exec::hash_table::hash_key;
use crate::exec::operator::{Operator, OperatorRef};
use crate::exec::operators::map_nested_loops::{Collapse, CollapseBindings, RowToBindings};

/// Loads a bloom filter from `filter_input` into `binding_position`, then
/// returns the rows of `stream_input`.
///
/// The filter is sized for `estimated_row_count` keys. If the filter input
/// turns out larger, it is read a second time into a filter of the right
/// size.
#[derive(Debug)]
pub struct UsingBloomFilter {
    filter_input: OperatorRef,
    filter_row_type: Arc<RowType>,
    estimated_row_count: usize,
    binding_position: usize,
    stream_input: OperatorRef,
    collators: Vec<Option<CollatorRef>>,
}

impl UsingBloomFilter {
    pub(crate) fn new(
        filter_input: OperatorRef,
        filter_row_type: Arc<RowType>,
        estimated_row_count: usize,
        binding_position: usize,
        stream_input: OperatorRef,
        collators: Option<Vec<Option<CollatorRef>>>,
    ) -> ExecResult<Self> {
        let collators = collators.unwrap_or_default();
        if !collators.is_empty() && collators.len() != filter_row_type.nfields() {
            return Err(ExecError::invalid(
                "collators",
                format!("{} collators for {} fields", collators.len(), filter_row_type.nfields()),
            ));
        }
        Ok(Self { filter_input, filter_row_type, estimated_row_count, binding_position, stream_input, collators })
    }
}

impl Operator for UsingBloomFilter {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        let filter_bindings = SingletonQueryBindingsCursor::new(None);
        Box::new(UsingExecution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.stream_input, ctx, bindings),
            filter_cursor: Arc::clone(&self.filter_input).cursor(ctx, Box::new(filter_bindings.clone())),
            filter_bindings,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Using_BloomFilter"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.stream_input.row_type()
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.filter_input), Arc::clone(&self.stream_input)]
    }
}

struct UsingExecution {
    plan: Arc<UsingBloomFilter>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    filter_cursor: BoxedCursor,
    filter_bindings: SingletonQueryBindingsCursor,
}

impl UsingExecution {
    /// Reads the whole filter input into `filter`, returning the row count.
    fn load(&mut self, filter: &mut BloomFilter, bindings: &QueryBindings) -> ExecResult<usize> {
        self.filter_bindings.reset(bindings.clone())?;
        self.filter_cursor.open_top_level()?;
        let mut rows = 0;
        let loaded = loop {
            match self.filter_cursor.next() {
                Ok(Some(row)) => {
                    debug_assert!(**row.row_type() == *self.plan.filter_row_type, "unexpected row {row:?}");
                    filter.add(hash_key(row.values(), &self.plan.collators));
                    rows += 1;
                }
                Ok(None) => break Ok(rows),
                Err(err) => break Err(err),
            }
        };
        let closed = self.filter_cursor.close_top_level();
        let rows = loaded?;
        closed?;
        Ok(rows)
    }

    fn build_filter(&mut self, bindings: &QueryBindings) -> ExecResult<BloomFilter> {
        let estimate = self.plan.estimated_row_count;
        let mut filter = BloomFilter::new(estimate, DEFAULT_ERROR_RATE);
        let mut rows = self.load(&mut filter, bindings)?;
        let rebuilt = rows > estimate;
        if rebuilt {
            debug!(estimate, rows, "bloom filter estimate exceeded, reloading");
            filter = BloomFilter::new(rows, DEFAULT_ERROR_RATE);
            rows = self.load(&mut filter, bindings)?;
        }
        self.lifecycle.ctx().observer().bloom_filter_built(rows, rebuilt);
        Ok(filter)
    }
}

impl Cursor for UsingExecution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let bindings = self.input.require(self.plan.name())?;
        let filter = self.build_filter(&bindings)?;
        bindings.set_bloom_filter(self.plan.binding_position, Arc::new(filter))?;
        self.input.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.lifecycle.begin_next().and_then(|()| self.input.get_mut().next());
        let result = result.map(|row| self.lifecycle.emit(row));
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        if let Some(bindings) = self.input.current() {
            bindings.clear(self.plan.binding_position)?;
        }
        self.input.get_mut().close()
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(UsingExecution => input);

/// Keeps the rows of `input` whose key may be in the bloom filter bound at
/// `binding_position` and for which `on_positive` returns a row.
///
/// The key is the value of `fields` evaluated on the row. `on_positive`
/// runs in a scope where the candidate row is bound at `binding_position`,
/// shadowing the filter.
///
/// When pipelined, candidates become child scopes at bindings depth
/// `depth`, so lookahead in `on_positive` can verify several candidates at
/// once.
#[derive(Debug)]
pub struct SelectBloomFilter {
    input: OperatorRef,
    on_positive: OperatorRef,
    fields: Vec<ExpressionRef>,
    collators: Vec<Option<CollatorRef>>,
    binding_position: usize,
    pipeline: bool,
    depth: u32,
}

impl SelectBloomFilter {
    pub(crate) fn new(
        input: OperatorRef,
        on_positive: OperatorRef,
        fields: Vec<ExpressionRef>,
        collators: Option<Vec<Option<CollatorRef>>>,
        binding_position: usize,
        pipeline: bool,
        depth: u32,
    ) -> ExecResult<Self> {
        if fields.is_empty() {
            return Err(ExecError::invalid("fields", "at least one field is required"));
        }
        if depth == 0 {
            return Err(ExecError::invalid("depth", "depth must be greater than 0"));
        }
        let collators = collators.unwrap_or_default();
        if !collators.is_empty() && collators.len() != fields.len() {
            return Err(ExecError::invalid("collators", format!("{} collators for {} fields", collators.len(), fields.len())));
        }
        Ok(Self { input, on_positive, fields, collators, binding_position, pipeline, depth })
    }

    fn hash_projected_row(&self, row: &Row, bindings: &QueryBindings) -> ExecResult<u64> {
        let key = self.fields.iter().map(|f| f.evaluate(row, bindings)).collect::<ExecResult<Vec<Value>>>()?;
        Ok(hash_key(&key, &self.collators))
    }

    fn may_match(&self, row: &Row, bindings: &QueryBindings, filter: &BloomFilter) -> ExecResult<bool> {
        let present = filter.may_contain(self.hash_projected_row(row, bindings)?);
        if present {
            trace!(?row, "bloom filter candidate");
        }
        Ok(present)
    }
}

impl Operator for SelectBloomFilter {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        if self.pipeline {
            let plan = Arc::clone(&self);
            let probe_ctx = Arc::clone(ctx);
            let candidates = RowToBindings::new(
                Arc::clone(&self.input).cursor(ctx, bindings),
                self.binding_position,
                self.depth,
            )
            .admitting(Box::new(move |row, base| {
                let filter = base.get_bloom_filter(plan.binding_position)?;
                let admitted = plan.may_match(row, base, &filter)?;
                if !admitted {
                    probe_ctx.record_rows_filtered(1);
                }
                Ok(admitted)
            }));
            let verify = Arc::clone(&self.on_positive).cursor(ctx, Box::new(candidates));
            return Box::new(CollapseBindings::new(
                self.name(),
                ctx,
                verify,
                self.depth,
                Collapse::Recover(self.binding_position),
            ));
        }
        let on_positive_bindings = SingletonQueryBindingsCursor::new(None);
        Box::new(SelectExecution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            input: ChainedInput::of(&self.input, ctx, bindings),
            on_positive: Arc::clone(&self.on_positive).cursor(ctx, Box::new(on_positive_bindings.clone())),
            on_positive_bindings,
            filter: None,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "Select_BloomFilter"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        self.input.row_type()
    }

    fn inputs(&self) -> Vec<OperatorRef> {
        vec![Arc::clone(&self.input), Arc::clone(&self.on_positive)]
    }
}

struct SelectExecution {
    plan: Arc<SelectBloomFilter>,
    lifecycle: CursorLifecycle,
    input: ChainedInput,
    on_positive: BoxedCursor,
    on_positive_bindings: SingletonQueryBindingsCursor,
    filter: Option<Arc<BloomFilter>>,
}

impl SelectExecution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let bindings = self.input.require(self.plan.name())?;
        let Some(filter) = self.filter.clone() else {
            return Err(ExecError::NoBindings(self.plan.name()));
        };
        while let Some(row) = self.input.get_mut().next()? {
            if self.plan.may_match(&row, &bindings, &filter)? && self.row_really_has_match(&row, &bindings)? {
                return Ok(self.lifecycle.emit(Some(row)));
            }
            self.lifecycle.ctx().record_rows_filtered(1);
        }
        Ok(self.lifecycle.emit(None))
    }

    fn row_really_has_match(&mut self, row: &Row, bindings: &QueryBindings) -> ExecResult<bool> {
        let scope = bindings.create_bindings();
        scope.set_row(self.plan.binding_position, row.clone())?;
        self.on_positive_bindings.reset(scope)?;
        self.on_positive.open_top_level()?;
        let found = self.on_positive.next();
        let closed = self.on_positive.close_top_level();
        let found = found?.is_some();
        closed?;
        Ok(found)
    }
}

impl Cursor for SelectExecution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        let bindings = self.input.require(self.plan.name())?;
        self.filter = Some(bindings.get_bloom_filter(self.plan.binding_position)?);
        self.input.get_mut().open()
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    fn close(&mut self) -> ExecResult<()> {
        if !self.lifecycle.close() {
            return Ok(());
        }
        self.filter = None;
        let verify = if self.on_positive.is_closed() { Ok(()) } else { self.on_positive.close_top_level() };
        let input = self.input.get_mut().close();
        verify.and(input)
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(SelectExecution => input);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::exec::expr::field;
    use crate::exec::observe::ExecutionObserver;
    use std::sync::Mutex;

    /// Verification that matches rows whose bound value is even.
    fn even_rows(t: &Arc<RowType>) -> OperatorRef {
        let evens = (0..100).step_by(2).map(|v| Row::new(Arc::clone(t), vec![Value::Int(v)], None)).collect();
        api::intersect_ordered(
            api::emit_bound_row_nested(Arc::clone(t), 0),
            api::values_scan_default(evens, Arc::clone(t)),
            t,
            t,
            1,
            1,
            &[true],
            api::JoinType::Inner,
            &[api::IntersectOption::OutputLeft, api::IntersectOption::SequentialScan],
            None,
            false,
        )
        .unwrap()
    }

    fn rows(t: &Arc<RowType>, values: impl IntoIterator<Item = i64>) -> Vec<Row> {
        values.into_iter().map(|v| Row::new(Arc::clone(t), vec![Value::Int(v)], None)).collect()
    }

    fn semi_join(filter: &[i64], stream: &[i64], estimate: usize, pipeline: bool, ctx: &Arc<QueryContext>) -> Vec<i64> {
        let t = RowType::values("t", 1);
        let select = api::select_bloom_filter(
            api::values_scan_default(rows(&t, stream.iter().copied()), Arc::clone(&t)),
            even_rows(&t),
            vec![field(0)],
            None,
            0,
            pipeline,
            1,
        )
        .unwrap();
        let plan = api::using_bloom_filter(
            api::values_scan_default(rows(&t, filter.iter().copied()), Arc::clone(&t)),
            Arc::clone(&t),
            estimate,
            0,
            select,
            None,
        )
        .unwrap();
        api::execute(&plan, ctx).unwrap().iter().filter_map(|r| r.value(0).as_int()).collect()
    }

    #[test]
    fn keeps_verified_candidates_only() {
        for pipeline in [false, true] {
            let ctx = Arc::new(QueryContext::new());
            // 3 is in the filter but fails verification.
            let out = semi_join(&[2, 3, 4, 8], &[1, 2, 3, 4, 5, 6, 8], 10, pipeline, &ctx);
            assert_eq!(out, vec![2, 4, 8], "pipeline {pipeline}");
        }
    }

    #[derive(Debug, Default)]
    struct Builds(Mutex<Vec<(usize, bool)>>);

    impl ExecutionObserver for Builds {
        fn bloom_filter_built(&self, rows: usize, rebuilt: bool) {
            self.0.lock().unwrap().push((rows, rebuilt));
        }
    }

    #[test]
    fn underestimated_filter_is_rebuilt_once() {
        let builds = Arc::new(Builds::default());
        let ctx = Arc::new(QueryContext::new().with_observer(builds.clone()));
        let filter: Vec<i64> = (0..50).map(|v| v * 2).collect();
        let out = semi_join(&filter, &[0, 1, 2, 98, 99], 4, false, &ctx);
        assert_eq!(out, vec![0, 2, 98]);
        assert_eq!(*builds.0.lock().unwrap(), vec![(50, true)]);
    }

    #[test]
    fn empty_filter_rejects_everything() {
        let ctx = Arc::new(QueryContext::new());
        assert!(semi_join(&[], &[2, 4], 1, false, &ctx).is_empty());
        assert_eq!(ctx.stats().rows_filtered(), 2);
    }

    #[test]
    fn validation() {
        let t = RowType::values("t", 1);
        let scan = || api::values_scan_default(Vec::new(), Arc::clone(&t));
        assert!(api::select_bloom_filter(scan(), scan(), Vec::new(), None, 0, false, 1).is_err());
        assert!(api::select_bloom_filter(scan(), scan(), vec![field(0)], None, 0, false, 0).is_err());
        assert!(api::select_bloom_filter(scan(), scan(), vec![field(0)], Some(vec![None, None]), 0, false, 1).is_err());
        assert!(api::using_bloom_filter(scan(), Arc::clone(&t), 1, 0, scan(), Some(vec![None, None])).is_err());
    }
}
