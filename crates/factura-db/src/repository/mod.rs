//! # Repository Module
//!
//! Database repository implementations for Factura.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and Who Writes What                     │
//! │                                                                         │
//! │  Invoice create hook                                                   │
//! │       │                                                                 │
//! │       │  db.invoices().create_invoice(store_id, at, payload)           │
//! │       ▼                                                                 │
//! │  InvoiceRepository ──► NumberAllocator ──► SequenceStore               │
//! │  ├── create_invoice                           ├── next     (write)     │
//! │  ├── get_by_id / page_after                   ├── peek     (read)      │
//! │  └── update_number (repair only)              └── raise_floor (repair) │
//! │                                                                         │
//! │  StoreRepository                                                       │
//! │  ├── insert / get_by_id                                                │
//! │  └── rename   (never touches existing invoice numbers)                 │
//! │                                                                         │
//! │  SequenceStore is the only writer of sequence_counters.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StoreRepository`](store::StoreRepository) - Store rows
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Invoice rows and numbering on create
//! - [`SequenceStore`](sequence::SequenceStore) - Per-scope counters

pub mod invoice;
pub mod sequence;
pub mod store;
