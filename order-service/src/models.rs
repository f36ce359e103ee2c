use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Delivery, Item, Order, Payment};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::deliveries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DeliveryRow {
    pub order_uid: String,
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentRow {
    pub order_uid: String,
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i32,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i32,
    pub goods_total: i32,
    pub custom_fee: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ItemRow {
    pub order_uid: String,
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i32,
    pub rid: String,
    pub name: String,
    pub sale: i32,
    pub size: String,
    pub total_price: i32,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

/// Every row an order occupies, split per table.
#[derive(Debug, Clone)]
pub struct OrderRows {
    pub order: OrderRow,
    pub delivery: DeliveryRow,
    pub payment: PaymentRow,
    pub items: Vec<ItemRow>,
}

impl From<&Order> for OrderRows {
    fn from(order: &Order) -> Self {
        let id = order.order_uid.clone();

        Self {
            order: OrderRow {
                order_uid: id.clone(),
                track_number: order.track_number.clone(),
                entry: order.entry.clone(),
                locale: order.locale.clone(),
                internal_signature: order.internal_signature.clone(),
                customer_id: order.customer_id.clone(),
                delivery_service: order.delivery_service.clone(),
                shardkey: order.shardkey.clone(),
                sm_id: order.sm_id,
                date_created: order.date_created,
                oof_shard: order.oof_shard.clone(),
            },
            delivery: DeliveryRow {
                order_uid: id.clone(),
                name: order.delivery.name.clone(),
                phone: order.delivery.phone.clone(),
                zip: order.delivery.zip.clone(),
                city: order.delivery.city.clone(),
                address: order.delivery.address.clone(),
                region: order.delivery.region.clone(),
                email: order.delivery.email.clone(),
            },
            payment: PaymentRow {
                order_uid: id.clone(),
                transaction: order.payment.transaction.clone(),
                request_id: order.payment.request_id.clone(),
                currency: order.payment.currency.clone(),
                provider: order.payment.provider.clone(),
                amount: order.payment.amount,
                payment_dt: order.payment.payment_dt,
                bank: order.payment.bank.clone(),
                delivery_cost: order.payment.delivery_cost,
                goods_total: order.payment.goods_total,
                custom_fee: order.payment.custom_fee,
            },
            items: order
                .items
                .iter()
                .map(|item| ItemRow {
                    order_uid: id.clone(),
                    chrt_id: item.chrt_id,
                    track_number: item.track_number.clone(),
                    price: item.price,
                    rid: item.rid.clone(),
                    name: item.name.clone(),
                    sale: item.sale,
                    size: item.size.clone(),
                    total_price: item.total_price,
                    nm_id: item.nm_id,
                    brand: item.brand.clone(),
                    status: item.status,
                })
                .collect(),
        }
    }
}

impl From<OrderRows> for Order {
    fn from(rows: OrderRows) -> Self {
        let OrderRows { order, delivery, payment, items } = rows;

        Self {
            order_uid: order.order_uid,
            track_number: order.track_number,
            entry: order.entry,
            delivery: Delivery {
                name: delivery.name,
                phone: delivery.phone,
                zip: delivery.zip,
                city: delivery.city,
                address: delivery.address,
                region: delivery.region,
                email: delivery.email,
            },
            payment: Payment {
                transaction: payment.transaction,
                request_id: payment.request_id,
                currency: payment.currency,
                provider: payment.provider,
                amount: payment.amount,
                payment_dt: payment.payment_dt,
                bank: payment.bank,
                delivery_cost: payment.delivery_cost,
                goods_total: payment.goods_total,
                custom_fee: payment.custom_fee,
            },
            items: items
                .into_iter()
                .map(|item| Item {
                    chrt_id: item.chrt_id,
                    track_number: item.track_number,
                    price: item.price,
                    rid: item.rid,
                    name: item.name,
                    sale: item.sale,
                    size: item.size,
                    total_price: item.total_price,
                    nm_id: item.nm_id,
                    brand: item.brand,
                    status: item.status,
                })
                .collect(),
            locale: order.locale,
            internal_signature: order.internal_signature,
            customer_id: order.customer_id,
            delivery_service: order.delivery_service,
            shardkey: order.shardkey,
            sm_id: order.sm_id,
            date_created: order.date_created,
            oof_shard: order.oof_shard,
        }
    }
}
