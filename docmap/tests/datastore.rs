mod common;

use std::sync::Arc;

use docmap::{
    bson::{Bson, doc},
    memory::MemoryDriver,
    prelude::*,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

use common::{Author, Book, Customer, FailingDriver, Note, Order, Person, datastore, datastore_over, mapper};

#[tokio::test]
async fn test_save_cascade_and_load_resolved_reference() {
    let store = datastore();
    let customer = Shared::new(Customer::named("C1", "Ada"));
    let order = Shared::new(Order {
        customer: Some(Ref::from(&customer)),
        ..Order::new("O1", Decimal::from(250))
    });

    let id = store.save_cascade(&order).await.unwrap();
    assert_eq!(id, Bson::String("O1".to_string()));
    assert_eq!(order.read().version, 1);
    assert_eq!(store.driver().documents("customers").len(), 1);

    let loaded = store.get::<Order>("O1").await.unwrap().unwrap();
    let loaded = loaded.read();
    assert_eq!(loaded.total, Decimal::from(250));
    let customer = loaded.customer.as_ref().and_then(Ref::get).unwrap();
    assert_eq!(customer.read().name, "Ada");
}

#[tokio::test]
async fn test_range_query_finds_matching_orders() {
    let store = datastore();
    for (id, total) in [("O1", 50), ("O2", 250), ("O3", 499), ("O4", 500)] {
        store.save(&mut Order::new(id, Decimal::from(total))).await.unwrap();
    }

    let query = store
        .query::<Order>()
        .filter("total >", 100)
        .filter("total <", 500)
        .sort("total", SortDirection::Desc);
    let ids: Vec<String> = store
        .find(&query)
        .await
        .unwrap()
        .iter()
        .map(|order| order.read().id.clone().unwrap_or_default())
        .collect();

    assert_eq!(ids, vec!["O3", "O2"]);
    let count = store
        .count(&store.query::<Order>().filter("total >", 100).filter("total <", 500))
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_stale_version_is_rejected() {
    let store = datastore();
    let mut order = Order::new("O1", Decimal::from(10));
    store.save(&mut order).await.unwrap();
    assert_eq!(order.version, 1);

    let mut first = store.get::<Order>("O1").await.unwrap().unwrap().try_unwrap().unwrap();
    let mut second = store.get::<Order>("O1").await.unwrap().unwrap().try_unwrap().unwrap();

    first.total = Decimal::from(20);
    store.save(&mut first).await.unwrap();
    assert_eq!(first.version, 2);

    second.total = Decimal::from(30);
    let err = store.save(&mut second).await.unwrap_err();
    assert!(err.is_conflict());
    match err {
        OdmError::ConcurrencyConflict {
            collection,
            id,
            expected_version,
        } => {
            assert_eq!(collection, "orders");
            assert_eq!(id, Bson::String("O1".to_string()));
            assert_eq!(expected_version, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(second.version, 1);

    let stored = store.get::<Order>("O1").await.unwrap().unwrap();
    assert_eq!(stored.read().total, Decimal::from(20));
    assert_eq!(stored.read().version, 2);
}

#[tokio::test]
async fn test_cyclic_graph_round_trips_through_the_store() {
    let store = datastore();
    let al = Shared::new(Person::named("A", "Al"));
    let bo = Shared::new(Person {
        friend: Some(Ref::from(&al)),
        ..Person::named("B", "Bo")
    });
    al.write().friend = Some(Ref::from(&bo));

    store.save_cascade(&al).await.unwrap();
    let people = store.driver().documents("people");
    let stored = people.iter().find(|person| person.get_str("_id").ok() == Some("A")).unwrap();
    assert_eq!(stored.get_document("friend").unwrap(), &doc! { "collection": "people", "id": "B" });
    assert_eq!(people.len(), 2);

    let loaded = store.get::<Person>("A").await.unwrap().unwrap();
    let friend = loaded.read().friend.as_ref().and_then(Ref::get).cloned().unwrap();
    assert_eq!(friend.read().name, "Bo");
    let back = friend.read().friend.as_ref().and_then(Ref::get).cloned().unwrap();
    assert!(back.ptr_eq(&loaded));
    assert_eq!(loaded.read().loads, 1);
}

#[tokio::test]
async fn test_find_page_reports_navigation() {
    let store = datastore();
    for n in 1..=5 {
        store
            .save(&mut Order::new(&format!("O{n}"), Decimal::from(n * 10)))
            .await
            .unwrap();
    }
    let query = store.query::<Order>().sort("total", SortDirection::Asc);

    let page = store.find_page(&query, &PaginationParams::new(2, 2)).await.unwrap();
    let totals: Vec<Decimal> = page.items.iter().map(|order| order.read().total).collect();
    assert_eq!(totals, vec![Decimal::from(30), Decimal::from(40)]);
    assert_eq!(page.count, 5);
    assert_eq!(page.next_page, Some(3));
    assert_eq!(page.previous_page, Some(1));

    let last = store.find_page(&query, &PaginationParams::new(3, 2)).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.next_page, None);
}

#[tokio::test]
async fn test_delete_by_query_and_entity() {
    let store = datastore();
    for (id, total) in [("O1", 10), ("O2", 20), ("O3", 30)] {
        store.save(&mut Order::new(id, Decimal::from(total))).await.unwrap();
    }

    let removed = store
        .delete_by_query(&store.query::<Order>().filter("total >=", 20))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = store.get::<Order>("O1").await.unwrap().unwrap();
    let removed = store.delete_entity(&*remaining.read()).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.count(&store.query::<Order>()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_save_runs_hooks_once_per_write() {
    let store = datastore();
    let mut order = Order::new("O1", Decimal::from(10));
    store.save(&mut order).await.unwrap();
    store.save(&mut order).await.unwrap();

    assert_eq!(order.saves, 2);
    assert_eq!(order.version, 2);
    // Transient fields never reach the document.
    let stored = &store.driver().documents("orders")[0];
    assert!(!stored.contains_key("saves"));
    assert_eq!(stored.get_i64("version").unwrap(), 2);
}

#[tokio::test]
async fn test_driver_assigns_missing_identifier() {
    let store = datastore();
    let mut note = Note {
        text: "remember".into(),
        ..Note::default()
    };

    let id = store.save(&mut note).await.unwrap();
    let Bson::ObjectId(oid) = id else {
        panic!("expected an ObjectId, got {id:?}");
    };
    assert_eq!(note.id, Some(oid));

    let loaded = store.get::<Note>(oid).await.unwrap().unwrap();
    assert_eq!(loaded.read().text, "remember");
}

#[tokio::test]
async fn test_id_generator_fills_missing_identifier() {
    let store = datastore().with_id_generator(UuidGenerator);
    let mut customer = Customer {
        name: "Grace".into(),
        ..Customer::default()
    };

    let id = store.save(&mut customer).await.unwrap();
    let generated = customer.id.clone().unwrap();
    assert_eq!(id, Bson::String(generated.clone()));
    assert_eq!(generated.len(), 36);

    let loaded = store.get::<Customer>(generated.as_str()).await.unwrap();
    assert!(loaded.is_some());
}

#[tokio::test]
async fn test_invalid_query_never_reaches_the_driver() {
    let store = datastore();
    store.save(&mut Order::new("O1", Decimal::from(10))).await.unwrap();

    let err = store
        .find(&store.query::<Order>().filter("totl >", 5))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.failures()[0].path, "totl");
}

#[tokio::test]
async fn test_reference_chain_loads_without_stored_discriminators() {
    let options = MapperOptions::builder().store_discriminator(false).build();
    let store = datastore_over(Arc::new(Mapper::new(options)), MemoryDriver::new());
    let cy = Shared::new(Person::named("C", "Cy"));
    let bo = Shared::new(Person {
        friend: Some(Ref::from(&cy)),
        ..Person::named("B", "Bo")
    });
    let al = Shared::new(Person {
        friend: Some(Ref::from(&bo)),
        ..Person::named("A", "Al")
    });

    store.save_cascade(&al).await.unwrap();
    let people = store.driver().documents("people");
    assert_eq!(people.len(), 3);
    assert!(people.iter().all(|person| !person.contains_key("className")));

    let loaded = store.get::<Person>("A").await.unwrap().unwrap();
    let bo = loaded.read().friend.as_ref().and_then(Ref::get).cloned().unwrap();
    let cy = bo.read().friend.as_ref().and_then(Ref::get).cloned().unwrap();
    assert_eq!(cy.read().name, "Cy");
    assert!(cy.read().friend.is_none());
}

#[tokio::test]
async fn test_failed_cascade_restores_the_root_version() {
    let store = datastore_over(mapper(), FailingDriver::new("customers"));
    let customer = Shared::new(Customer::named("C1", "Ada"));
    let order = Shared::new(Order {
        customer: Some(Ref::from(&customer)),
        ..Order::new("O1", Decimal::from(250))
    });

    let err = store.save_cascade(&order).await.unwrap_err();
    assert!(matches!(err, OdmError::Driver(_)));
    assert_eq!(order.read().version, 0);
    assert!(store.driver().inner.documents("orders").is_empty());

    // A retry fails the same way rather than with a version conflict.
    let err = store.save_cascade(&order).await.unwrap_err();
    assert!(!err.is_conflict());
    assert_eq!(order.read().version, 0);
}

#[tokio::test]
async fn test_failed_insert_clears_the_generated_identifier() {
    let store = datastore_over(mapper(), FailingDriver::new("customers")).with_id_generator(UuidGenerator);
    let mut customer = Customer {
        name: "Grace".into(),
        ..Customer::default()
    };

    let err = store.save(&mut customer).await.unwrap_err();
    assert!(matches!(err, OdmError::Driver(_)));
    assert_eq!(customer.id, None);
}

#[tokio::test]
async fn test_post_save_runs_once_per_referenced_instance() {
    let store = datastore();
    let author = Shared::new(Author::named("A1", "Ursula"));
    let book = Shared::new(Book {
        id: Some("B1".into()),
        title: "The Dispossessed".into(),
        author: Some(Ref::from(&author)),
        editor: Some(Ref::from(&author)),
        ..Book::default()
    });

    store.save_cascade(&book).await.unwrap();
    assert_eq!(book.read().saves, 1);
    assert_eq!(author.read().saves, 1);
    assert_eq!(store.driver().documents("authors").len(), 1);

    let mut solo = Author::named("A2", "Octavia");
    store.save(&mut solo).await.unwrap();
    store.save(&mut solo).await.unwrap();
    assert_eq!(solo.saves, 2);
}

#[tokio::test]
async fn test_pre_load_sees_the_stored_document() {
    let store = datastore();
    store
        .driver()
        .insert("authors", doc! { "_id": "A1", "fullName": "Ursula" })
        .await
        .unwrap();
    store
        .driver()
        .insert(
            "books",
            doc! {
                "_id": "B1",
                "title": "Lathe",
                "author": { "collection": "authors", "id": "A1" },
                "editor": { "collection": "authors", "id": "A1" },
            },
        )
        .await
        .unwrap();

    let author = store.get::<Author>("A1").await.unwrap().unwrap();
    assert_eq!(author.read().name, "Ursula");
    assert_eq!(author.read().loads, 1);

    let book = store.get::<Book>("B1").await.unwrap().unwrap();
    let book = book.read();
    let written = book.author.as_ref().and_then(Ref::get).cloned().unwrap();
    let edited = book.editor.as_ref().and_then(Ref::get).cloned().unwrap();
    assert!(written.ptr_eq(&edited));
    assert_eq!(written.read().name, "Ursula");
    assert_eq!(written.read().loads, 1);
}
