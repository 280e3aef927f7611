//! Live table storage
//!
//! Rows of a partitioned table are kept per partition; a replicated table
//! keeps a single copy that every site reads. Replicas of a partition share
//! one copy because every replica applies the same transactions.
//!
//! Tables with a primary key track their keys so that inserts reject
//! duplicates and restore can divert them instead.

use std::collections::{BTreeMap, HashSet};

use strata_core::{
    Catalog, Error, Hashinator, PartitionId, Result, Row, TableSchema, Value,
};

/// What happened to a row handed to [`LiveTables::load_row`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Row stored
    Inserted,
    /// A row with the same primary key exists already
    Duplicate,
}

#[derive(Debug, Default, Clone)]
struct PartitionData {
    rows: Vec<Row>,
    keys: HashSet<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct TableData {
    schema: TableSchema,
    partitions: Vec<PartitionData>,
}

impl TableData {
    fn new(schema: TableSchema, partition_count: u32) -> Self {
        let count = if schema.is_replicated() {
            1
        } else {
            partition_count.max(1) as usize
        };
        TableData {
            schema,
            partitions: vec![PartitionData::default(); count],
        }
    }

    fn slot(&self, partition_id: PartitionId) -> usize {
        if self.schema.is_replicated() {
            0
        } else {
            partition_id as usize
        }
    }

    fn store(&mut self, partition_id: PartitionId, row: Row) -> Result<LoadOutcome> {
        let slot = self.slot(partition_id);
        let has_key = !self.schema.primary_key.is_empty();
        let key = has_key.then(|| self.schema.row_key(&row));
        let partition = self.partitions.get_mut(slot).ok_or_else(|| {
            Error::invalid_input(format!(
                "partition {} does not exist for table {}",
                partition_id, self.schema.name
            ))
        })?;
        if let Some(key) = key {
            if !partition.keys.insert(key) {
                return Ok(LoadOutcome::Duplicate);
            }
        }
        partition.rows.push(row);
        Ok(LoadOutcome::Inserted)
    }
}

/// All live tables of a cluster
#[derive(Debug, Clone)]
pub struct LiveTables {
    catalog: Catalog,
    data: BTreeMap<String, TableData>,
    hashinator: Hashinator,
}

impl LiveTables {
    /// Empty storage for `partition_count` partitions
    pub fn new(partition_count: u32) -> Self {
        LiveTables {
            catalog: Catalog::new(),
            data: BTreeMap::new(),
            hashinator: Hashinator::new(partition_count),
        }
    }

    /// Table declarations
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Partition routing for the current layout
    pub fn hashinator(&self) -> Hashinator {
        self.hashinator
    }

    /// Declare a table
    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        self.catalog.add_table(schema.clone())?;
        let data = TableData::new(schema, self.hashinator.partition_count());
        self.data.insert(data.schema.name.clone(), data);
        Ok(())
    }

    /// Drop a table and its rows
    pub fn drop_table(&mut self, name: &str) -> bool {
        self.data.remove(&name.to_uppercase());
        self.catalog.drop_table(name).is_some()
    }

    fn table(&self, name: &str) -> Result<&TableData> {
        self.data
            .get(&name.to_uppercase())
            .ok_or_else(|| Error::TableNotFound(name.to_uppercase()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.data
            .get_mut(&name.to_uppercase())
            .ok_or_else(|| Error::TableNotFound(name.to_uppercase()))
    }

    /// Coerce a row to the table's column types and check it
    pub fn prepare_row(&self, table: &str, row: Row) -> Result<Row> {
        let schema = &self.table(table)?.schema;
        if row.len() != schema.columns.len() {
            return Err(Error::invalid_input(format!(
                "table {} expects {} columns, row has {}",
                schema.name,
                schema.columns.len(),
                row.len()
            )));
        }
        let row = row
            .iter()
            .zip(&schema.columns)
            .map(|(v, col)| v.coerce_to(col.column_type))
            .collect::<std::result::Result<Row, _>>()?;
        schema.check_row(&row)?;
        Ok(row)
    }

    /// Partition a row belongs to under the current layout
    pub fn route(&self, schema: &TableSchema, row: &Row) -> PartitionId {
        match schema.partition_column_index() {
            Some(idx) => self
                .hashinator
                .partition_for(row.get(idx).unwrap_or(&Value::Null)),
            None => 0,
        }
    }

    /// Insert a row, rejecting primary key duplicates
    pub fn insert(&mut self, table: &str, row: Row) -> Result<PartitionId> {
        let row = self.prepare_row(table, row)?;
        let data = self.table(table)?;
        let partition_id = self.route(&data.schema, &row);
        match self.table_mut(table)?.store(partition_id, row)? {
            LoadOutcome::Inserted => Ok(partition_id),
            LoadOutcome::Duplicate => Err(Error::invalid_input(format!(
                "Constraint violation: duplicate primary key in table {}",
                table.to_uppercase()
            ))),
        }
    }

    /// Store a row produced by restore into a given partition
    pub fn load_row(
        &mut self,
        table: &str,
        partition_id: PartitionId,
        row: Row,
    ) -> Result<LoadOutcome> {
        self.table_mut(table)?.store(partition_id, row)
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self
            .table(table)?
            .partitions
            .iter()
            .map(|p| p.rows.len())
            .sum())
    }

    /// Rows of every partition, partition by partition
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self
            .table(table)?
            .partitions
            .iter()
            .flat_map(|p| p.rows.iter().cloned())
            .collect())
    }

    /// Rows of one partition (partition 0 for replicated tables)
    pub fn partition_rows(&self, table: &str, partition_id: PartitionId) -> Result<&[Row]> {
        let data = self.table(table)?;
        data.partitions
            .get(data.slot(partition_id))
            .map(|p| p.rows.as_slice())
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "partition {} does not exist for table {}",
                    partition_id, data.schema.name
                ))
            })
    }

    /// Row count of each partition
    pub fn partition_row_counts(&self, table: &str) -> Result<Vec<usize>> {
        Ok(self
            .table(table)?
            .partitions
            .iter()
            .map(|p| p.rows.len())
            .collect())
    }
}
