use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(deserialize_with = "null_as_default")]
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery: Delivery,
    #[serde(deserialize_with = "null_as_default")]
    pub payment: Payment,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i32,
    /// Unix seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i32,
    pub goods_total: i32,
    pub custom_fee: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
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

/// Producers send `null` for absent nested objects and empty item lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why an inbound payload could not become an [`Order`].
///
/// Either variant makes the message unprocessable; retrying it can never
/// succeed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed order payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("order payload has an empty order_uid")]
    MissingId,
}

impl Order {
    /// Parses a broker payload and checks the one structural rule the
    /// pipeline depends on: a non-empty id. Absent fields take zero values;
    /// only unparseable bytes or mistyped fields are malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let order: Order = serde_json::from_slice(bytes)?;
        if order.order_uid.is_empty() {
            return Err(DecodeError::MissingId);
        }
        Ok(order)
    }

    pub fn id(&self) -> &str {
        &self.order_uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json(order_uid: &str) -> serde_json::Value {
        json!({
            "order_uid": order_uid,
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {
                "name": "Test Testov",
                "phone": "+9720000000",
                "zip": "2639809",
                "city": "Kiryat Mozkin",
                "address": "Ploshad Mira 15",
                "region": "Kraiot",
                "email": "test@gmail.com"
            },
            "payment": {
                "transaction": order_uid,
                "request_id": "",
                "currency": "USD",
                "provider": "wbpay",
                "amount": 1817,
                "payment_dt": 1637907727,
                "bank": "alpha",
                "delivery_cost": 1500,
                "goods_total": 317,
                "custom_fee": 0
            },
            "items": [{
                "chrt_id": 9934930,
                "track_number": "WBILMTESTTRACK",
                "price": 453,
                "rid": "ab4219087a764ae0btest",
                "name": "Mascaras",
                "sale": 30,
                "size": "0",
                "total_price": 317,
                "nm_id": 2389212,
                "brand": "Vivienne Sabo",
                "status": 202
            }],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        })
    }

    #[test]
    fn decodes_upstream_payload() {
        let bytes = serde_json::to_vec(&sample_json("b563feb7b2b84b6test")).unwrap();
        let order = Order::decode(&bytes).unwrap();

        assert_eq!(order.id(), "b563feb7b2b84b6test");
        assert_eq!(order.delivery.city, "Kiryat Mozkin");
        assert_eq!(order.payment.amount, 1817);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].chrt_id, 9934930);
        assert_eq!(order.date_created.timestamp(), 1637907739);
    }

    #[test]
    fn missing_request_id_defaults_to_empty() {
        let mut value = sample_json("o1");
        value["payment"].as_object_mut().unwrap().remove("request_id");
        let order = Order::decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(order.payment.request_id, "");
    }

    #[test]
    fn empty_id_is_rejected() {
        let payloads: [&[u8]; 3] = [b"{}", br#"{"order_uid":""}"#, br#"{"order_uid":null}"#];
        for payload in payloads {
            assert!(
                matches!(Order::decode(payload), Err(DecodeError::MissingId)),
                "{}",
                String::from_utf8_lossy(payload)
            );
        }
        let bytes = serde_json::to_vec(&sample_json("")).unwrap();
        assert!(matches!(Order::decode(&bytes), Err(DecodeError::MissingId)));
    }

    #[test]
    fn whitespace_id_is_kept_as_is() {
        let order = Order::decode(br#"{"order_uid":"  "}"#).unwrap();
        assert_eq!(order.id(), "  ");
    }

    #[test]
    fn id_only_payload_takes_zero_values() {
        let order = Order::decode(br#"{"order_uid":"x"}"#).unwrap();

        assert_eq!(order.id(), "x");
        assert_eq!(order.track_number, "");
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment.amount, 0);
        assert!(order.items.is_empty());
        assert_eq!(order.date_created.timestamp(), 0);
    }

    #[test]
    fn null_nested_values_decode_as_empty() {
        let mut value = sample_json("n1");
        value["items"] = serde_json::Value::Null;
        value["delivery"] = serde_json::Value::Null;
        let order = Order::decode(&serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(order.items.is_empty());
        assert_eq!(order.delivery, Delivery::default());
        assert_eq!(order.payment.amount, 1817);
    }

    #[test]
    fn partial_item_keeps_present_fields() {
        let order = Order::decode(br#"{"order_uid":"p1","items":[{"chrt_id":7}]}"#).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].chrt_id, 7);
        assert_eq!(order.items[0].name, "");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(Order::decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(Order::decode(b"42"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn mistyped_field_is_malformed() {
        let mut value = sample_json("t1");
        value["sm_id"] = serde_json::json!("ninety-nine");
        assert!(matches!(
            Order::decode(&serde_json::to_vec(&value).unwrap()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let original = sample_json("o2");
        let order = Order::decode(&serde_json::to_vec(&original).unwrap()).unwrap();
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["order_uid"], "o2");
        assert_eq!(value["items"][0]["nm_id"], 2389212);
        assert_eq!(value["payment"]["payment_dt"], 1637907727);
    }
}
