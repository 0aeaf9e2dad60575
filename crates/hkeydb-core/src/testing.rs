//! Fixture groups for tests.
//!
//! Two small groups cover the tree shapes the lookup and merge operators
//! care about:
//!
//! ```text
//! coi:  customer(1) ─┬─ order(2) ── item(3)      rabc:  r(1) ─┬─ a(2)
//!                    └─ address(4)                            ├─ b(3)
//!                                                             └─ c(4)
//! ```
//!
//! Row builders take every ancestor key needed for the hkey, so orphans
//! (rows whose ancestors don't exist) are built the same way as any other
//! row.

use std::sync::Arc;

use crate::hkey::HKey;
use crate::row::Row;
use crate::schema::{Group, GroupBuilder, RowType, Table};
use crate::types::Value;

fn build_error(err: crate::CoreError) -> ! {
    panic!("fixture schema is invalid: {err}")
}

/// The customer/order/item/address group.
#[derive(Debug, Clone)]
pub struct Coi {
    /// The group.
    pub group: Arc<Group>,
    /// customer(cid, name)
    pub customer: Arc<Table>,
    /// order(oid, cid, salesman)
    pub order: Arc<Table>,
    /// item(iid, oid)
    pub item: Arc<Table>,
    /// address(aid, cid, address)
    pub address: Arc<Table>,
    /// Row type of customer.
    pub customer_type: Arc<RowType>,
    /// Row type of order.
    pub order_type: Arc<RowType>,
    /// Row type of item.
    pub item_type: Arc<RowType>,
    /// Row type of address.
    pub address_type: Arc<RowType>,
    /// Index on customer.name: (name, cid).
    pub customer_name_index: Arc<RowType>,
    /// Index on order.salesman: (salesman, cid, oid).
    pub order_salesman_index: Arc<RowType>,
    /// Index on item.iid: (iid, cid, oid).
    pub item_iid_index: Arc<RowType>,
    /// Index on address.address: (address, cid, aid).
    pub address_address_index: Arc<RowType>,
}

impl Coi {
    /// Builds the group.
    #[must_use]
    pub fn new() -> Self {
        let mut b = GroupBuilder::new("coi");
        let customer = b.root("customer", &["cid", "name"]);
        let order = b.child(&customer, "order", &["oid", "cid", "salesman"]).unwrap_or_else(|e| build_error(e));
        let item = b.child(&order, "item", &["iid", "oid"]).unwrap_or_else(|e| build_error(e));
        let address =
            b.child(&customer, "address", &["aid", "cid", "address"]).unwrap_or_else(|e| build_error(e));
        let group = b.build().unwrap_or_else(|e| build_error(e));
        Self {
            customer_type: RowType::table(&customer),
            order_type: RowType::table(&order),
            item_type: RowType::table(&item),
            address_type: RowType::table(&address),
            customer_name_index: RowType::index(&customer, "name", 2),
            order_salesman_index: RowType::index(&order, "salesman", 3),
            item_iid_index: RowType::index(&item, "iid", 3),
            address_address_index: RowType::index(&address, "address", 3),
            group,
            customer,
            order,
            item,
            address,
        }
    }

    /// hkey of a customer.
    #[must_use]
    pub fn customer_hkey(&self, cid: i64) -> HKey {
        HKey::of([(self.customer.ordinal(), [Value::Int(cid)])])
    }

    /// hkey of an order.
    #[must_use]
    pub fn order_hkey(&self, cid: i64, oid: i64) -> HKey {
        let mut hkey = self.customer_hkey(cid);
        hkey.extend_with_ordinal(self.order.ordinal());
        hkey.extend_with_value(Value::Int(oid));
        hkey
    }

    /// hkey of an item.
    #[must_use]
    pub fn item_hkey(&self, cid: i64, oid: i64, iid: i64) -> HKey {
        let mut hkey = self.order_hkey(cid, oid);
        hkey.extend_with_ordinal(self.item.ordinal());
        hkey.extend_with_value(Value::Int(iid));
        hkey
    }

    /// hkey of an address.
    #[must_use]
    pub fn address_hkey(&self, cid: i64, aid: i64) -> HKey {
        let mut hkey = self.customer_hkey(cid);
        hkey.extend_with_ordinal(self.address.ordinal());
        hkey.extend_with_value(Value::Int(aid));
        hkey
    }

    /// A customer row.
    #[must_use]
    pub fn customer_row(&self, cid: i64, name: &str) -> Row {
        Row::new(
            Arc::clone(&self.customer_type),
            vec![Value::Int(cid), Value::from(name)],
            Some(self.customer_hkey(cid)),
        )
    }

    /// An order row.
    #[must_use]
    pub fn order_row(&self, oid: i64, cid: i64, salesman: &str) -> Row {
        Row::new(
            Arc::clone(&self.order_type),
            vec![Value::Int(oid), Value::Int(cid), Value::from(salesman)],
            Some(self.order_hkey(cid, oid)),
        )
    }

    /// An item row; `cid` is the customer of the item's order.
    #[must_use]
    pub fn item_row(&self, iid: i64, oid: i64, cid: i64) -> Row {
        Row::new(
            Arc::clone(&self.item_type),
            vec![Value::Int(iid), Value::Int(oid)],
            Some(self.item_hkey(cid, oid, iid)),
        )
    }

    /// An address row.
    #[must_use]
    pub fn address_row(&self, aid: i64, cid: i64, address: &str) -> Row {
        Row::new(
            Arc::clone(&self.address_type),
            vec![Value::Int(aid), Value::Int(cid), Value::from(address)],
            Some(self.address_hkey(cid, aid)),
        )
    }

    /// An index row of `customer_name_index`.
    #[must_use]
    pub fn customer_name_index_row(&self, name: &str, cid: i64) -> Row {
        Row::new(
            Arc::clone(&self.customer_name_index),
            vec![Value::from(name), Value::Int(cid)],
            Some(self.customer_hkey(cid)),
        )
    }

    /// An index row of `order_salesman_index`.
    #[must_use]
    pub fn order_salesman_index_row(&self, salesman: &str, cid: i64, oid: i64) -> Row {
        Row::new(
            Arc::clone(&self.order_salesman_index),
            vec![Value::from(salesman), Value::Int(cid), Value::Int(oid)],
            Some(self.order_hkey(cid, oid)),
        )
    }

    /// An index row of `item_iid_index`.
    #[must_use]
    pub fn item_iid_index_row(&self, iid: i64, cid: i64, oid: i64) -> Row {
        Row::new(
            Arc::clone(&self.item_iid_index),
            vec![Value::Int(iid), Value::Int(cid), Value::Int(oid)],
            Some(self.item_hkey(cid, oid, iid)),
        )
    }

    /// An index row of `address_address_index`.
    #[must_use]
    pub fn address_address_index_row(&self, address: &str, cid: i64, aid: i64) -> Row {
        Row::new(
            Arc::clone(&self.address_address_index),
            vec![Value::from(address), Value::Int(cid), Value::Int(aid)],
            Some(self.address_hkey(cid, aid)),
        )
    }

    /// The standard contents: three customers with orders, items and
    /// addresses, plus an orphan address (customer 5) and an orphan order
    /// with items (customer 3).
    #[must_use]
    pub fn standard_rows(&self) -> Vec<Row> {
        vec![
            self.customer_row(1, "northbridge"),
            self.customer_row(2, "foundation"),
            self.customer_row(4, "highland"),
            self.address_row(1001, 1, "111 1111 st"),
            self.address_row(1002, 1, "111 2222 st"),
            self.address_row(2001, 2, "222 1111 st"),
            self.address_row(2002, 2, "222 2222 st"),
            self.address_row(4001, 4, "444 1111 st"),
            self.address_row(4002, 4, "444 2222 st"),
            self.order_row(11, 1, "ori"),
            self.order_row(12, 1, "david"),
            self.order_row(21, 2, "tom"),
            self.order_row(22, 2, "jack"),
            self.order_row(31, 3, "peter"),
            self.item_row(111, 11, 1),
            self.item_row(112, 11, 1),
            self.item_row(121, 12, 1),
            self.item_row(122, 12, 1),
            self.item_row(211, 21, 2),
            self.item_row(212, 21, 2),
            self.item_row(221, 22, 2),
            self.item_row(222, 22, 2),
            self.address_row(5001, 5, "555 1111 st"),
            self.item_row(311, 31, 3),
            self.item_row(312, 31, 3),
        ]
    }
}

impl Default for Coi {
    fn default() -> Self {
        Self::new()
    }
}

/// The r/a/b/c group: one root with three sibling children.
#[derive(Debug, Clone)]
pub struct Rabc {
    /// The group.
    pub group: Arc<Group>,
    /// r(rid, rvalue)
    pub r: Arc<Table>,
    /// a(aid, rid, avalue)
    pub a: Arc<Table>,
    /// b(bid, rid, bvalue)
    pub b: Arc<Table>,
    /// c(cid, rid, cvalue)
    pub c: Arc<Table>,
    /// Row type of r.
    pub r_type: Arc<RowType>,
    /// Row type of a.
    pub a_type: Arc<RowType>,
    /// Row type of b.
    pub b_type: Arc<RowType>,
    /// Row type of c.
    pub c_type: Arc<RowType>,
    /// Index on a.avalue: (avalue, rid, aid).
    pub a_value_index: Arc<RowType>,
}

impl Rabc {
    /// Builds the group.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = GroupBuilder::new("rabc");
        let r = builder.root("r", &["rid", "rvalue"]);
        let a = builder.child(&r, "a", &["aid", "rid", "avalue"]).unwrap_or_else(|e| build_error(e));
        let b = builder.child(&r, "b", &["bid", "rid", "bvalue"]).unwrap_or_else(|e| build_error(e));
        let c = builder.child(&r, "c", &["cid", "rid", "cvalue"]).unwrap_or_else(|e| build_error(e));
        let group = builder.build().unwrap_or_else(|e| build_error(e));
        Self {
            r_type: RowType::table(&r),
            a_type: RowType::table(&a),
            b_type: RowType::table(&b),
            c_type: RowType::table(&c),
            a_value_index: RowType::index(&a, "avalue", 3),
            group,
            r,
            a,
            b,
            c,
        }
    }

    /// An r row.
    #[must_use]
    pub fn r_row(&self, rid: i64, value: &str) -> Row {
        Row::new(
            Arc::clone(&self.r_type),
            vec![Value::Int(rid), Value::from(value)],
            Some(HKey::of([(self.r.ordinal(), [Value::Int(rid)])])),
        )
    }

    fn child_row(&self, table: &Table, row_type: &Arc<RowType>, id: i64, rid: i64, value: &str) -> Row {
        Row::new(
            Arc::clone(row_type),
            vec![Value::Int(id), Value::Int(rid), Value::from(value)],
            Some(HKey::of([
                (self.r.ordinal(), [Value::Int(rid)]),
                (table.ordinal(), [Value::Int(id)]),
            ])),
        )
    }

    /// An a row.
    #[must_use]
    pub fn a_row(&self, aid: i64, rid: i64, value: &str) -> Row {
        self.child_row(&self.a, &self.a_type, aid, rid, value)
    }

    /// A b row.
    #[must_use]
    pub fn b_row(&self, bid: i64, rid: i64, value: &str) -> Row {
        self.child_row(&self.b, &self.b_type, bid, rid, value)
    }

    /// A c row.
    #[must_use]
    pub fn c_row(&self, cid: i64, rid: i64, value: &str) -> Row {
        self.child_row(&self.c, &self.c_type, cid, rid, value)
    }

    /// An index row of `a_value_index`.
    #[must_use]
    pub fn a_value_index_row(&self, value: &str, rid: i64, aid: i64) -> Row {
        Row::new(
            Arc::clone(&self.a_value_index),
            vec![Value::from(value), Value::Int(rid), Value::Int(aid)],
            Some(HKey::of([
                (self.r.ordinal(), [Value::Int(rid)]),
                (self.a.ordinal(), [Value::Int(aid)]),
            ])),
        )
    }

    /// Two r rows, each with two a, b and c children.
    #[must_use]
    pub fn standard_rows(&self) -> Vec<Row> {
        vec![
            self.r_row(1, "r1"),
            self.r_row(2, "r2"),
            self.a_row(13, 1, "a13"),
            self.a_row(14, 1, "a14"),
            self.a_row(23, 2, "a23"),
            self.a_row(24, 2, "a24"),
            self.b_row(15, 1, "b15"),
            self.b_row(16, 1, "b16"),
            self.b_row(25, 2, "b25"),
            self.b_row(26, 2, "b26"),
            self.c_row(17, 1, "c17"),
            self.c_row(18, 1, "c18"),
            self.c_row(27, 2, "c27"),
            self.c_row(28, 2, "c28"),
        ]
    }
}

impl Default for Rabc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_hkeys_follow_tree() {
        let coi = Coi::new();
        let c = coi.customer_row(1, "x");
        let i = coi.item_row(111, 11, 1);
        let a = coi.address_row(1001, 1, "y");
        assert!(c.ancestor_of(&i));
        assert!(c.ancestor_of(&a));
        assert!(i.hkey() < a.hkey());
    }

    #[test]
    fn rabc_children_grouped_by_table() {
        let rabc = Rabc::new();
        assert!(rabc.a_row(14, 1, "a").hkey() < rabc.b_row(15, 1, "b").hkey());
        assert!(rabc.c_row(18, 1, "c").hkey() < rabc.r_row(2, "r").hkey());
    }
}
