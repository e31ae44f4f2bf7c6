//! Operator contract
//!
//! An operator transforms one record into one record (1:1) or into a
//! collection (1:N). Collections are dispatched to [`Operator::process_batch`],
//! whose default implementation expands every element through
//! [`Operator::process_item`] and flattens the results one level.

use crate::data::{Data, Record};
use crate::error::{FlowError, Result};

/// A single-responsibility transform over records.
///
/// Implementations must be safe to call from several threads at once; any
/// mutable state has to be synchronised internally.
pub trait Operator: Send + Sync {
    /// Operator name used in logs and error messages.
    fn name(&self) -> &str;

    /// Short human readable description.
    fn description(&self) -> String {
        format!("{} operator", self.name())
    }

    /// Whether this operator aggregates collections itself.
    ///
    /// Operators returning `true` must override [`Operator::process_batch`].
    fn supports_batch(&self) -> bool {
        false
    }

    /// Transform a single record.
    fn process_item(&self, record: Record) -> Result<Data>;

    /// Transform a whole collection.
    fn process_batch(&self, records: Vec<Record>) -> Result<Data> {
        if self.supports_batch() {
            return Err(FlowError::NotImplemented {
                operator: self.name().to_string(),
                method: "process_batch",
            });
        }
        expand_each(self, records)
    }

    /// Dispatch on the input shape.
    fn process(&self, input: Data) -> Result<Data> {
        match input {
            Data::Collection(records) => self.process_batch(records),
            Data::Record(record) => self.process_item(record),
        }
    }
}

/// Apply `process_item` to every record and flatten element-level
/// collections into a single output collection.
pub fn expand_each<O: Operator + ?Sized>(op: &O, records: Vec<Record>) -> Result<Data> {
    let mut output = Vec::with_capacity(records.len());
    for record in records {
        match op.process_item(record)? {
            Data::Record(record) => output.push(record),
            Data::Collection(expanded) => output.extend(expanded),
        }
    }
    Ok(Data::Collection(output))
}

impl<T: Operator + ?Sized> Operator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> String {
        (**self).description()
    }

    fn supports_batch(&self) -> bool {
        (**self).supports_batch()
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        (**self).process_item(record)
    }

    fn process_batch(&self, records: Vec<Record>) -> Result<Data> {
        (**self).process_batch(records)
    }

    fn process(&self, input: Data) -> Result<Data> {
        (**self).process(input)
    }
}

/// Operator wrapper that reports a custom name.
pub struct Named<O> {
    name: String,
    inner: O,
}

impl<O: Operator> Named<O> {
    /// Give `inner` the name `name`.
    pub fn new(name: impl Into<String>, inner: O) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// Wrapped operator.
    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: Operator> Operator for Named<O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn supports_batch(&self) -> bool {
        self.inner.supports_batch()
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        self.inner.process_item(record)
    }

    fn process_batch(&self, records: Vec<Record>) -> Result<Data> {
        self.inner.process_batch(records)
    }

    fn process(&self, input: Data) -> Result<Data> {
        self.inner.process(input)
    }
}

/// Operator backed by a closure, for ad-hoc steps and tests.
pub struct FnOperator<F> {
    name: String,
    func: F,
}

impl<F> FnOperator<F>
where
    F: Fn(Record) -> Result<Data> + Send + Sync,
{
    /// Wrap `func` as an operator called `name`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Operator for FnOperator<F>
where
    F: Fn(Record) -> Result<Data> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process_item(&self, record: Record) -> Result<Data> {
        (self.func)(record)
    }
}
