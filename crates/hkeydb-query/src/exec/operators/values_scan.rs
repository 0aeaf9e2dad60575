//! Scan over an in-memory list of rows.

use std::sync::Arc;

use hkeydb_core::{Row, RowType};

use crate::error::ExecResult;
use crate::exec::bindings::QueryBindingsCursor;
use crate::exec::context::QueryContext;
use crate::exec::cursor::{
    close_on_interrupt, delegate_bindings, BoxedCursor, ColumnSelector, Cursor, CursorLifecycle,
    CursorState, LeafBindings,
};
use crate::exec::operator::Operator;
use crate::exec::ordering::{adjust_for_direction, compare_fields};

/// Returns a fixed list of rows, the same for every bindings scope.
///
/// The cursor supports [`jump`](Cursor::jump) when the rows are sorted on
/// the jumped columns, which makes it a stand-in for an index scan under
/// merge operators. Like a mixed-order index, each column may run in
/// either direction; the direction of a column is read off the first
/// adjacent pair of rows that differs first at that column, and columns
/// with no such pair count as ascending.
#[derive(Debug)]
pub struct ValuesScanDefault {
    rows: Vec<Row>,
    row_type: Arc<RowType>,
    ascending: Vec<bool>,
}

impl ValuesScanDefault {
    pub(crate) fn new(rows: Vec<Row>, row_type: Arc<RowType>) -> Self {
        let ascending = column_directions(&rows, row_type.nfields());
        Self { rows, row_type, ascending }
    }
}

fn column_directions(rows: &[Row], nfields: usize) -> Vec<bool> {
    let mut directions: Vec<Option<bool>> = vec![None; nfields];
    for pair in rows.windows(2) {
        let n = nfields.min(pair[0].values().len()).min(pair[1].values().len());
        let c = compare_fields(&pair[0], &pair[1], 0, 0, n, None);
        if c != 0 {
            let field = usize::try_from(c.unsigned_abs() - 1).unwrap_or(usize::MAX);
            if let Some(direction) = directions.get_mut(field) {
                direction.get_or_insert(c < 0);
            }
        }
    }
    directions.into_iter().map(|d| d.unwrap_or(true)).collect()
}

impl Operator for ValuesScanDefault {
    fn cursor(
        self: Arc<Self>,
        ctx: &Arc<QueryContext>,
        bindings: Box<dyn QueryBindingsCursor>,
    ) -> BoxedCursor {
        Box::new(Execution {
            lifecycle: CursorLifecycle::new(self.name(), ctx),
            bindings: LeafBindings::new(bindings),
            position: 0,
            plan: self,
        })
    }

    fn name(&self) -> &'static str {
        "ValuesScan_Default"
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(Arc::clone(&self.row_type))
    }
}

struct Execution {
    plan: Arc<ValuesScanDefault>,
    lifecycle: CursorLifecycle,
    bindings: LeafBindings,
    position: usize,
}

impl Execution {
    fn advance(&mut self) -> ExecResult<Option<Row>> {
        self.lifecycle.begin_next()?;
        let row = self.plan.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(self.lifecycle.emit(row))
    }
}

impl Cursor for Execution {
    fn open(&mut self) -> ExecResult<()> {
        self.lifecycle.open()?;
        self.position = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Row>> {
        let result = self.advance();
        close_on_interrupt(self, result)
    }

    /// Moves forward to the first remaining row at or after `row` in scan
    /// order. Never moves backward.
    fn jump(&mut self, row: &Row, selector: ColumnSelector) -> ExecResult<()> {
        self.lifecycle.check_open()?;
        let n = selector.selected_prefix(row.row_type().nfields()).min(self.plan.row_type.nfields());
        let rows = &self.plan.rows;
        let ascending = &self.plan.ascending;
        let skipped = rows[self.position.min(rows.len())..]
            .iter()
            .position(|candidate| adjust_for_direction(compare_fields(candidate, row, 0, 0, n, None), ascending) >= 0)
            .unwrap_or(rows.len().saturating_sub(self.position));
        self.position = (self.position + skipped).min(rows.len());
        self.lifecycle.set_active();
        Ok(())
    }

    fn close(&mut self) -> ExecResult<()> {
        if self.lifecycle.close() {
            self.position = 0;
        }
        Ok(())
    }

    fn state(&self) -> CursorState {
        self.lifecycle.state()
    }

    fn name(&self) -> &'static str {
        self.lifecycle.operator()
    }
}

delegate_bindings!(Execution => bindings);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::bindings::SingletonQueryBindingsCursor;
    use hkeydb_core::Value;

    fn target(v: i64) -> Row {
        Row::new(RowType::values("k", 1), vec![Value::Int(v)], None)
    }

    fn scan(values: &[i64]) -> BoxedCursor {
        let row_type = RowType::values("n", 1);
        let rows = values.iter().map(|v| Row::new(Arc::clone(&row_type), vec![Value::Int(*v)], None)).collect();
        let ctx = Arc::new(QueryContext::new());
        let bindings = SingletonQueryBindingsCursor::new(Some(ctx.create_bindings()));
        Arc::new(ValuesScanDefault::new(rows, row_type)).cursor(&ctx, Box::new(bindings))
    }

    fn int(row: Option<Row>) -> Option<i64> {
        row.and_then(|r| r.value(0).as_int())
    }

    #[test]
    fn scans_in_order_and_reopens() {
        let mut cursor = scan(&[1, 2]);
        cursor.open_top_level().unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(1));
        assert_eq!(int(cursor.next().unwrap()), Some(2));
        assert_eq!(cursor.next().unwrap(), None);
        assert!(cursor.is_idle());
        cursor.close().unwrap();
        cursor.open().unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(1));
        cursor.close_top_level().unwrap();
        assert!(cursor.is_closed());
    }

    #[test]
    fn jump_skips_forward() {
        let mut cursor = scan(&[1, 3, 5, 7]);
        cursor.open_top_level().unwrap();
        let target = Row::new(RowType::values("k", 1), vec![Value::Int(4)], None);
        cursor.jump(&target, ColumnSelector::All).unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(5));

        let past = Row::new(RowType::values("k", 1), vec![Value::Int(9)], None);
        cursor.jump(&past, ColumnSelector::Prefix(1)).unwrap();
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn jump_follows_descending_rows() {
        let mut cursor = scan(&[7, 5, 3, 1]);
        cursor.open_top_level().unwrap();
        cursor.jump(&target(6), ColumnSelector::All).unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(5));
        cursor.jump(&target(3), ColumnSelector::All).unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(3));
        cursor.jump(&target(0), ColumnSelector::All).unwrap();
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn jump_never_moves_backward() {
        let mut cursor = scan(&[1, 3, 5, 7]);
        cursor.open_top_level().unwrap();
        cursor.jump(&target(5), ColumnSelector::All).unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(5));
        cursor.jump(&target(1), ColumnSelector::All).unwrap();
        assert_eq!(int(cursor.next().unwrap()), Some(7));
    }

    #[test]
    fn directions_read_per_column() {
        let t = RowType::values("t", 2);
        let row = |a: i64, b: i64| Row::new(Arc::clone(&t), vec![Value::Int(a), Value::Int(b)], None);
        let rows = vec![row(1, 9), row(1, 4), row(2, 8), row(2, 1)];
        assert_eq!(column_directions(&rows, 2), vec![true, false]);
        assert_eq!(column_directions(&rows[..1], 2), vec![true, true]);
    }
}
